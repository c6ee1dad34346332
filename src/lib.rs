//! # Cinder
//!
//! Execution core for a small stack-based bytecode: runtime values, the
//! operand stack, heap and call-stack, the builtin registry, a
//! one-instruction-per-tick dispatcher and a host that drives a program
//! through its lifecycle.
//!
//! ```
//! use cinder::bytecode::{Instruction, Opcode, Program};
//! use cinder::lang::value::Value;
//! use cinder::runtime::{BuiltinRegistry, VmBc, VmConfig};
//!
//! let program = Program::new(vec![
//!     Instruction::push(2),
//!     Instruction::push(3),
//!     Instruction::new(Opcode::MathMult),
//! ]);
//! let mut vm = VmBc::new(program, BuiltinRegistry::new(), VmConfig::default())?;
//! vm.run()?;
//! assert_eq!(vm.stack().values(), vec![Value::Int32(6)]);
//! # Ok::<(), cinder::runtime::VmError>(())
//! ```

pub mod bytecode;
pub mod lang;
pub mod runtime;
