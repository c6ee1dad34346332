use crate::bytecode::{Instruction, Opcode, Operand, Program};
use crate::lang::value::Value;
use crate::runtime::runtime_error::{ErrorKind, VmError};

/// Structural checks run once when a program is loaded.
///
/// This is a linear scan over the instruction stream. It validates the
/// shape of every instruction (operand kinds, field names, jump and call
/// targets) but does not follow control flow, so it cannot prove the
/// stack is balanced.
pub fn check_program(program: &Program) -> Result<(), VmError> {
    let len = program.len();

    for (position, instruction) in program.instructions.iter().enumerate() {
        check_instruction(instruction, position, len)
            .map_err(|kind| VmError::new(kind).at(position, instruction.opcode))?;
    }

    for (role, offset) in program.entry_points.iter() {
        if offset >= len {
            return Err(VmError::new(ErrorKind::MalformedProgram(format!(
                "{} routine at {} is past the end of code ({})",
                role.name(),
                offset,
                len
            ))));
        }
    }

    Ok(())
}

fn check_instruction(instruction: &Instruction, position: usize, len: usize) -> Result<(), ErrorKind> {
    let opcode = instruction.opcode;
    let invalid = |expected| ErrorKind::InvalidOperand { opcode, expected };

    if opcode.needs_offset() && instruction.operand.as_offset().is_none() {
        return Err(invalid("an integer"));
    }
    if opcode.needs_field() && instruction.field.is_none() {
        return Err(ErrorKind::MissingFieldOperand(opcode));
    }

    match opcode {
        Opcode::PushValue => {
            if !matches!(instruction.operand, Operand::Value(_)) {
                return Err(invalid("a literal value"));
            }
        }
        Opcode::JumpBy | Opcode::JumpByIfTrue | Opcode::JumpByIfFalse => {
            let offset = instruction.operand.as_offset().unwrap_or_default();
            match (position as i64).checked_add(offset) {
                Some(target) if (0..=len as i64).contains(&target) => {}
                Some(target) => return Err(ErrorKind::JumpOutOfRange { target, len }),
                None => return Err(ErrorKind::JumpOutOfRange { target: offset, len }),
            }
        }
        Opcode::Call => {
            let target = instruction.operand.as_offset().unwrap_or_default();
            if target < 0 || target >= len as i64 {
                return Err(ErrorKind::JumpOutOfRange { target, len });
            }
        }
        Opcode::CallBuiltin => {
            if instruction.operand.as_offset().unwrap_or_default() < 0 {
                return Err(invalid("a non-negative argument count"));
            }
        }
        Opcode::HeapGet | Opcode::HeapSet => match &instruction.operand {
            Operand::None | Operand::Value(Value::Reference(_)) => {}
            operand => match operand.as_offset() {
                Some(n) if n >= 0 => {}
                _ => return Err(invalid("a heap address")),
            },
        },
        Opcode::CsPush | Opcode::DebugSetTag => {
            if instruction.operand.as_str().is_none() && instruction.tag.is_none() {
                return Err(invalid("a string label"));
            }
        }
        _ => {}
    }

    Ok(())
}
