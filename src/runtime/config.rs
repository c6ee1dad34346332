use serde::{Deserialize, Serialize};

use crate::bytecode::Opcode;

/// Which opcodes a machine implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Profile {
    /// Everything, including structs, lists and string indexing.
    #[default]
    Full,
    /// Numeric core only. Composite opcodes are rejected.
    Primitive,
}

impl Profile {
    pub fn supports(self, opcode: Opcode) -> bool {
        match self {
            Profile::Full => true,
            Profile::Primitive => !opcode.is_composite(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Number of heap cells allocated up front.
    pub heap_size: usize,
    pub max_stack_size: usize,
    /// Maximum number of pending return addresses.
    pub max_call_depth: usize,
    pub max_steps: Option<u64>,
    pub profile: Profile,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            heap_size: 1024,
            max_stack_size: 10_000,
            max_call_depth: 1000,
            max_steps: None,
            profile: Profile::Full,
        }
    }
}
