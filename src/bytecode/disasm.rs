use std::fmt::Write;

use crate::bytecode::{Instruction, Opcode, Program};

/// Render a program as a listing with jump targets and entry points marked.
pub fn listing(program: &Program) -> String {
    let mut out = String::new();
    let jump_targets = collect_jump_targets(&program.instructions);

    let _ = writeln!(out, "════════════════════════════════════════");
    let _ = writeln!(out, " {} instructions", program.len());
    for (role, offset) in program.entry_points.iter() {
        let _ = writeln!(out, " {:<16}→ {:04}", role.name(), offset);
    }
    let _ = writeln!(out, "════════════════════════════════════════");

    for (ip, instruction) in program.instructions.iter().enumerate() {
        if jump_targets.contains(&ip) {
            let _ = writeln!(out, "      ┌──────────────────────────────────");
        }
        let marker = if jump_targets.contains(&ip) { "► " } else { "  " };
        let _ = writeln!(out, "{:04} {}{}", ip, marker, format_instruction(instruction, ip));
    }

    out
}

fn collect_jump_targets(instructions: &[Instruction]) -> Vec<usize> {
    let mut targets = Vec::new();

    for (ip, instruction) in instructions.iter().enumerate() {
        let target = match instruction.opcode {
            op if op.is_jump() => instruction
                .operand
                .as_offset()
                .and_then(|offset| (ip as i64).checked_add(offset)),
            Opcode::Call => instruction.operand.as_offset(),
            _ => None,
        };

        if let Some(target) = target.and_then(|t| usize::try_from(t).ok()) {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    targets
}

fn format_instruction(instruction: &Instruction, ip: usize) -> String {
    let mut line = instruction.to_string();

    if instruction.opcode.is_jump() {
        if let Some(offset) = instruction.operand.as_offset() {
            let direction = if offset < 0 { "↑" } else { "↓" };
            match (ip as i64).checked_add(offset) {
                Some(target) => {
                    let _ = write!(line, " {} (→ {:04})", direction, target);
                }
                None => {
                    let _ = write!(line, " {} (→ ?)", direction);
                }
            }
        }
    }

    match instruction.opcode.stack_effect() {
        Some((pops, pushes)) if pops > 0 || pushes > 0 => {
            let _ = write!(line, "  ; ( {} -- {} )", pops, pushes);
        }
        _ => {}
    }

    if let Some(tag) = &instruction.tag {
        let _ = write!(line, "  # {}", tag);
    }

    line.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Role;
    use crate::lang::value::Value;

    #[test]
    fn test_listing_marks_jump_targets() {
        let program = Program::new(vec![
            Instruction::push(Value::Bool(true)),
            Instruction::with_offset(Opcode::JumpByIfFalse, 2),
            Instruction::push(Value::Int32(1)),
            Instruction::new(Opcode::Exit).tagged("halt"),
        ])
        .with_entry(Role::Entry, 0);

        let text = listing(&program);
        assert!(text.contains(" 4 instructions"));
        assert!(text.contains("entry"));
        assert!(text.contains("0003 ► EXIT"));
        assert!(text.contains("↓ (→ 0003)"));
        assert!(text.contains("# halt"));
        assert!(text.contains("; ( 0 -- 1 )"));
    }

    #[test]
    fn test_listing_survives_overflowing_jump() {
        let program = Program::new(vec![
            Instruction::new(Opcode::Comment),
            Instruction::jump_by(i64::MAX),
        ]);
        let text = listing(&program);
        assert!(text.contains("↓ (→ ?)"));
    }
}
