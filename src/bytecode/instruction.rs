use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bytecode::Opcode;
use crate::lang::value::Value;

/// Instruction operand: a literal, an index/offset, or nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Operand {
    #[default]
    None,
    Value(Value),
    Offset(i64),
}

impl Operand {
    /// Integer view of the operand. Integer literals count as offsets.
    pub fn as_offset(&self) -> Option<i64> {
        match self {
            Operand::Offset(n) => Some(*n),
            Operand::Value(v) => v.as_integer().map(i64::from),
            Operand::None => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Operand::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Value(Value::String(s)) => write!(f, "{:?}", s),
            Operand::Value(v) => write!(f, "{}", v),
            Operand::Offset(n) => write!(f, "{}", n),
        }
    }
}

/// A single decoded instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
    /// Field name for `LOAD_FIELD` / `STORE_FIELD`.
    pub field: Option<String>,
    /// Free-form annotation carried into diagnostics.
    pub tag: Option<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: Operand::None,
            field: None,
            tag: None,
        }
    }

    pub fn with_value(opcode: Opcode, value: impl Into<Value>) -> Self {
        Self {
            operand: Operand::Value(value.into()),
            ..Self::new(opcode)
        }
    }

    pub fn with_offset(opcode: Opcode, offset: i64) -> Self {
        Self {
            operand: Operand::Offset(offset),
            ..Self::new(opcode)
        }
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.field = Some(name.into());
        self
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    // Shorthands used by hosts and tests that assemble code by hand.

    pub fn push(value: impl Into<Value>) -> Self {
        Self::with_value(Opcode::PushValue, value)
    }

    pub fn pop() -> Self {
        Self::new(Opcode::PopValue)
    }

    pub fn load(index: i64) -> Self {
        Self::with_offset(Opcode::LoadValue, index)
    }

    pub fn load_br(offset: i64) -> Self {
        Self::with_offset(Opcode::LoadValueBr, offset)
    }

    pub fn store(index: i64) -> Self {
        Self::with_offset(Opcode::StoreValue, index)
    }

    pub fn store_br(offset: i64) -> Self {
        Self::with_offset(Opcode::StoreValueBr, offset)
    }

    pub fn jump_by(offset: i64) -> Self {
        Self::with_offset(Opcode::JumpBy, offset)
    }

    pub fn call(target: i64) -> Self {
        Self::with_offset(Opcode::Call, target)
    }

    pub fn call_builtin(argc: i64) -> Self {
        Self::with_offset(Opcode::CallBuiltin, argc)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20}", self.opcode.mnemonic())?;
        if !self.operand.is_none() {
            write!(f, " {}", self.operand)?;
        }
        if let Some(field) = &self.field {
            write!(f, " .{}", field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_from_integer_literal() {
        assert_eq!(Operand::Offset(-2).as_offset(), Some(-2));
        assert_eq!(Operand::Value(Value::Byte(7)).as_offset(), Some(7));
        assert_eq!(Operand::Value(Value::Bool(true)).as_offset(), None);
        assert_eq!(Operand::None.as_offset(), None);
    }

    #[test]
    fn test_display() {
        let ins = Instruction::with_offset(Opcode::LoadField, 2).field("x");
        assert_eq!(ins.to_string().trim_end(), "LOAD_FIELD           2 .x");
        assert_eq!(
            Instruction::push("hi").to_string(),
            "PUSH_VALUE           \"hi\""
        );
        assert_eq!(Instruction::new(Opcode::Exit).to_string().trim_end(), "EXIT");
    }
}
