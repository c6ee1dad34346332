use serde::{Deserialize, Serialize};
use std::fmt;

use crate::runtime::runtime_error::ErrorKind;

// =============================================================================
// OPCODE - instruction discriminants
// =============================================================================

/// Operation selected by an [`Instruction`](crate::bytecode::Instruction).
///
/// Suffix conventions for slot access:
/// - no suffix: absolute stack index
/// - `Br`: relative to the frame base pointer
/// - `R`: relative to the current stack length (`-1` is the top)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Comment,

    // stack
    PushValue,
    PopValue,
    LoadValue,
    LoadValueBr,
    LoadValueR,
    StoreValue,
    StoreValueBr,
    StoreValueR,

    // struct fields
    LoadField,
    LoadFieldBr,
    LoadFieldR,
    StoreField,
    StoreFieldBr,
    StoreFieldR,

    // calls
    Call,
    Return,
    CallBuiltin,

    /// Relative jump. `JumpBy(1)` is a no-op, `JumpBy(0)` loops forever.
    JumpBy,
    /// Pop bool, jump if true. Otherwise continue with the next instruction.
    JumpByIfTrue,
    /// Pop bool, jump if false. Otherwise continue with the next instruction.
    JumpByIfFalse,

    // arithmetic
    MathAdd,
    MathSub,
    MathMult,
    MathDiv,
    MathMod,
    MathNeg,

    // comparison & logic
    LogicLt,
    LogicMt,
    LogicLteq,
    LogicMteq,
    LogicEq,
    LogicNeq,
    LogicAnd,
    LogicOr,
    LogicXor,
    LogicNot,
    BitShl,
    BitShr,

    // lists
    ListIndex,
    ListPushItem,
    ListAddItem,
    ListSetItem,
    ListPullItem,
    ListRemoveItem,

    TypeGet,

    // heap
    HeapGet,
    HeapSet,

    // debugging
    DebugSetTag,
    CsPush,
    CsPop,

    CopyValue,
    CopyValueRecursive,

    Exit,
}

impl Opcode {
    /// Every opcode, indexed by its raw byte value.
    pub const ALL: [Opcode; 54] = [
        Opcode::Comment,
        Opcode::PushValue,
        Opcode::PopValue,
        Opcode::LoadValue,
        Opcode::LoadValueBr,
        Opcode::LoadValueR,
        Opcode::StoreValue,
        Opcode::StoreValueBr,
        Opcode::StoreValueR,
        Opcode::LoadField,
        Opcode::LoadFieldBr,
        Opcode::LoadFieldR,
        Opcode::StoreField,
        Opcode::StoreFieldBr,
        Opcode::StoreFieldR,
        Opcode::Call,
        Opcode::Return,
        Opcode::CallBuiltin,
        Opcode::JumpBy,
        Opcode::JumpByIfTrue,
        Opcode::JumpByIfFalse,
        Opcode::MathAdd,
        Opcode::MathSub,
        Opcode::MathMult,
        Opcode::MathDiv,
        Opcode::MathMod,
        Opcode::MathNeg,
        Opcode::LogicLt,
        Opcode::LogicMt,
        Opcode::LogicLteq,
        Opcode::LogicMteq,
        Opcode::LogicEq,
        Opcode::LogicNeq,
        Opcode::LogicAnd,
        Opcode::LogicOr,
        Opcode::LogicXor,
        Opcode::LogicNot,
        Opcode::BitShl,
        Opcode::BitShr,
        Opcode::ListIndex,
        Opcode::ListPushItem,
        Opcode::ListAddItem,
        Opcode::ListSetItem,
        Opcode::ListPullItem,
        Opcode::ListRemoveItem,
        Opcode::TypeGet,
        Opcode::HeapGet,
        Opcode::HeapSet,
        Opcode::DebugSetTag,
        Opcode::CsPush,
        Opcode::CsPop,
        Opcode::CopyValue,
        Opcode::CopyValueRecursive,
        Opcode::Exit,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Comment => "COMMENT",
            Opcode::PushValue => "PUSH_VALUE",
            Opcode::PopValue => "POP_VALUE",
            Opcode::LoadValue => "LOAD_VALUE",
            Opcode::LoadValueBr => "LOAD_VALUE_BR",
            Opcode::LoadValueR => "LOAD_VALUE_R",
            Opcode::StoreValue => "STORE_VALUE",
            Opcode::StoreValueBr => "STORE_VALUE_BR",
            Opcode::StoreValueR => "STORE_VALUE_R",
            Opcode::LoadField => "LOAD_FIELD",
            Opcode::LoadFieldBr => "LOAD_FIELD_BR",
            Opcode::LoadFieldR => "LOAD_FIELD_R",
            Opcode::StoreField => "STORE_FIELD",
            Opcode::StoreFieldBr => "STORE_FIELD_BR",
            Opcode::StoreFieldR => "STORE_FIELD_R",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::CallBuiltin => "CALL_BUILTIN",
            Opcode::JumpBy => "JUMP_BY",
            Opcode::JumpByIfTrue => "JUMP_BY_IF_TRUE",
            Opcode::JumpByIfFalse => "JUMP_BY_IF_FALSE",
            Opcode::MathAdd => "MATH_ADD",
            Opcode::MathSub => "MATH_SUB",
            Opcode::MathMult => "MATH_MULT",
            Opcode::MathDiv => "MATH_DIV",
            Opcode::MathMod => "MATH_MOD",
            Opcode::MathNeg => "MATH_NEG",
            Opcode::LogicLt => "LOGIC_LT",
            Opcode::LogicMt => "LOGIC_MT",
            Opcode::LogicLteq => "LOGIC_LTEQ",
            Opcode::LogicMteq => "LOGIC_MTEQ",
            Opcode::LogicEq => "LOGIC_EQ",
            Opcode::LogicNeq => "LOGIC_NEQ",
            Opcode::LogicAnd => "LOGIC_AND",
            Opcode::LogicOr => "LOGIC_OR",
            Opcode::LogicXor => "LOGIC_XOR",
            Opcode::LogicNot => "LOGIC_NOT",
            Opcode::BitShl => "BIT_SHL",
            Opcode::BitShr => "BIT_SHR",
            Opcode::ListIndex => "LIST_INDEX",
            Opcode::ListPushItem => "LIST_PUSH_ITEM",
            Opcode::ListAddItem => "LIST_ADD_ITEM",
            Opcode::ListSetItem => "LIST_SET_ITEM",
            Opcode::ListPullItem => "LIST_PULL_ITEM",
            Opcode::ListRemoveItem => "LIST_REMOVE_ITEM",
            Opcode::TypeGet => "TYPE_GET",
            Opcode::HeapGet => "HEAP_GET",
            Opcode::HeapSet => "HEAP_SET",
            Opcode::DebugSetTag => "DEBUG_SET_TAG",
            Opcode::CsPush => "CS_PUSH",
            Opcode::CsPop => "CS_POP",
            Opcode::CopyValue => "COPY_VALUE",
            Opcode::CopyValueRecursive => "COPY_VALUE_RECURSIVE",
            Opcode::Exit => "EXIT",
        }
    }

    /// Returns (pops, pushes), or None if the effect depends on runtime
    /// state (calls, returns, exit).
    pub fn stack_effect(self) -> Option<(u32, u32)> {
        use Opcode::*;
        Some(match self {
            Comment => (0, 0),

            PushValue => (0, 1),
            PopValue => (1, 0),
            LoadValue | LoadValueBr | LoadValueR => (0, 1),
            StoreValue | StoreValueBr | StoreValueR => (1, 0),
            LoadField | LoadFieldBr | LoadFieldR => (0, 1),
            StoreField | StoreFieldBr | StoreFieldR => (1, 0),

            JumpBy => (0, 0),
            JumpByIfTrue | JumpByIfFalse => (1, 0),

            MathAdd | MathSub | MathMult | MathDiv | MathMod => (2, 1),
            MathNeg => (1, 1),

            LogicLt | LogicMt | LogicLteq | LogicMteq | LogicEq | LogicNeq => (2, 1),
            LogicAnd | LogicOr | LogicXor | BitShl | BitShr => (2, 1),
            LogicNot => (1, 1),

            ListIndex => (2, 1),
            ListPushItem => (2, 0),
            ListAddItem | ListSetItem => (3, 0),
            ListPullItem => (1, 1),
            ListRemoveItem => (2, 0),

            TypeGet => (1, 1),
            // address comes from the operand when present
            HeapGet => (0, 1),
            HeapSet => (1, 0),

            DebugSetTag | CsPush | CsPop => (0, 0),
            CopyValue | CopyValueRecursive => (1, 1),

            // Frame and builtin effects depend on the callee
            Call | Return | CallBuiltin | Exit => return None,
        })
    }

    /// Synthetic cycle cost used by hosts to pace execution.
    pub fn cost(self) -> u32 {
        use Opcode::*;
        match self {
            Comment => 0,
            PushValue | PopValue | JumpBy | DebugSetTag | CsPush | CsPop | Exit => 1,
            LoadValue | LoadValueBr | LoadValueR => 1,
            StoreValue | StoreValueBr | StoreValueR => 2,
            JumpByIfTrue | JumpByIfFalse => 2,
            MathAdd | MathSub | MathMult | MathNeg => 2,
            MathDiv | MathMod => 4,
            LogicLt | LogicMt | LogicLteq | LogicMteq | LogicEq | LogicNeq => 2,
            LogicAnd | LogicOr | LogicXor | LogicNot | BitShl | BitShr => 2,
            LoadField | LoadFieldBr | LoadFieldR => 3,
            StoreField | StoreFieldBr | StoreFieldR => 4,
            ListIndex | ListPullItem | TypeGet | HeapGet | HeapSet => 3,
            ListPushItem | ListAddItem | ListSetItem | ListRemoveItem => 4,
            CopyValue => 4,
            CopyValueRecursive => 8,
            Call | Return => 4,
            CallBuiltin => 10,
        }
    }

    /// Opcodes that only make sense on struct, list or string values.
    pub fn is_composite(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            LoadField
                | LoadFieldBr
                | LoadFieldR
                | StoreField
                | StoreFieldBr
                | StoreFieldR
                | ListIndex
                | ListPushItem
                | ListAddItem
                | ListSetItem
                | ListPullItem
                | ListRemoveItem
                | CopyValueRecursive
        )
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::JumpBy | Opcode::JumpByIfTrue | Opcode::JumpByIfFalse
        )
    }

    pub fn needs_field(self) -> bool {
        matches!(
            self,
            Opcode::LoadField
                | Opcode::LoadFieldBr
                | Opcode::LoadFieldR
                | Opcode::StoreField
                | Opcode::StoreFieldBr
                | Opcode::StoreFieldR
        )
    }

    /// Opcodes whose operand is a slot index or code offset.
    pub fn needs_offset(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            LoadValue
                | LoadValueBr
                | LoadValueR
                | StoreValue
                | StoreValueBr
                | StoreValueR
                | LoadField
                | LoadFieldBr
                | LoadFieldR
                | StoreField
                | StoreFieldBr
                | StoreFieldR
                | Call
                | CallBuiltin
                | JumpBy
                | JumpByIfTrue
                | JumpByIfFalse
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ErrorKind;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .get(byte as usize)
            .copied()
            .ok_or(ErrorKind::UnknownOpcode(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_byte_matches_discriminant() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as u8 as usize, i, "{} out of order", op);
            assert_eq!(Opcode::try_from(i as u8).ok(), Some(*op));
        }
    }

    #[test]
    fn test_unknown_raw_opcode() {
        let err = Opcode::try_from(200).unwrap_err();
        assert_eq!(err, ErrorKind::UnknownOpcode(200));
    }

    #[test]
    fn test_mnemonics_are_unique() {
        let mut names: Vec<_> = Opcode::ALL.iter().map(|op| op.mnemonic()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Opcode::ALL.len());
    }

    #[test]
    fn test_dynamic_effects() {
        assert_eq!(Opcode::Call.stack_effect(), None);
        assert_eq!(Opcode::CallBuiltin.stack_effect(), None);
        assert_eq!(Opcode::MathAdd.stack_effect(), Some((2, 1)));
        assert_eq!(Opcode::ListSetItem.stack_effect(), Some((3, 0)));
    }
}
