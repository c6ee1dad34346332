pub mod builtins;
pub mod call_stack;
pub mod config;
pub mod heap;
pub mod host;
pub mod runtime_error;
pub mod stack;
pub mod timer;
pub mod vm_bc;

pub use builtins::BuiltinRegistry;
pub use config::{Profile, VmConfig};
pub use host::{Host, Phase};
pub use runtime_error::{ErrorKind, Severity, VmError, VmResult};
pub use timer::TimerHandle;
pub use vm_bc::{InstructionCost, VmBc};
