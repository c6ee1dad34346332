pub mod disasm;
pub mod instruction;
pub mod ir;
pub mod op;
pub mod verify;

pub use instruction::{Instruction, Operand};
pub use ir::{BuiltinSignature, EntryPoints, Program, Role};
pub use op::Opcode;
