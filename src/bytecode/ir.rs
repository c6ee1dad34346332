use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bytecode::Instruction;
use crate::lang::value::TypeTag;
use crate::runtime::runtime_error::{ErrorKind, VmError};

/// Special routines the host jumps to while driving a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Block that pushes the global variables, ends with `EXIT`.
    SetGlobals,
    /// Function run once after globals are set.
    Entry,
    /// Function run repeatedly until the program exits.
    Update,
    /// Function run once before globals are disposed.
    End,
    /// Block that tears the globals down, ends with `EXIT`.
    DisposeGlobals,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::SetGlobals => "set globals",
            Role::Entry => "entry",
            Role::Update => "update",
            Role::End => "end",
            Role::DisposeGlobals => "dispose globals",
        }
    }
}

/// Offsets of the routines that fill each [`Role`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoints {
    offsets: BTreeMap<Role, usize>,
}

impl EntryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, role: Role, offset: usize) {
        self.offsets.insert(role, offset);
    }

    pub fn get(&self, role: Role) -> Option<usize> {
        self.offsets.get(&role).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, usize)> + '_ {
        self.offsets.iter().map(|(role, offset)| (*role, *offset))
    }
}

/// Name and parameter types of a builtin the program expects to call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinSignature {
    pub name: String,
    pub parameters: Vec<TypeTag>,
    pub returns_value: bool,
}

/// A compiled program: the instruction stream plus the tables a host
/// needs to drive it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub entry_points: EntryPoints,
    pub imports: Vec<BuiltinSignature>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            ..Self::default()
        }
    }

    pub fn with_entry(mut self, role: Role, offset: usize) -> Self {
        self.entry_points.set(role, offset);
        self
    }

    pub fn with_import(mut self, signature: BuiltinSignature) -> Self {
        self.imports.push(signature);
        self
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Encode as a postcard image.
    pub fn to_bytes(&self) -> Result<Vec<u8>, VmError> {
        postcard::to_allocvec(self)
            .map_err(|e| VmError::new(ErrorKind::MalformedProgram(e.to_string())))
    }

    /// Decode a postcard image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VmError> {
        postcard::from_bytes(bytes)
            .map_err(|e| VmError::new(ErrorKind::MalformedProgram(e.to_string())))
    }
}
