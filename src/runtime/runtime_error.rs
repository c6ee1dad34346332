use std::fmt;

use crate::bytecode::Opcode;
use crate::lang::value::{HeapAddress, TypeTag};

/// How bad an error is.
///
/// Every error ends the run; severity only tells the host who is to blame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Caused by the running program (bad types, bad indices, bad input).
    Runtime,
    /// The compiler emitted something the machine cannot execute.
    Internal,
    /// Machine state is corrupt or a resource limit was hit.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Runtime => write!(f, "runtime error"),
            Severity::Internal => write!(f, "internal error"),
            Severity::Fatal => write!(f, "fatal error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    // runtime
    #[error("cannot apply {op} to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("cannot apply {op} to {operand}")]
    UnaryTypeMismatch {
        op: &'static str,
        operand: &'static str,
    },

    #[error("expected {expected}, got {found}")]
    ExpectedType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("cannot cast {from} to {to}")]
    InvalidCast { from: &'static str, to: TypeTag },

    #[error("value {value} is out of range for {to}")]
    CastOverflow { value: String, to: TypeTag },

    #[error("cannot parse {text:?} as {target}")]
    Parse { text: String, target: TypeTag },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("cannot pull from an empty list")]
    EmptyList,

    #[error("{target} has no field '{field}'")]
    MissingField { field: String, target: String },

    #[error("field '{field}' of {target} is read-only")]
    ReadOnlyField { field: String, target: String },

    #[error("list of {expected} cannot hold {found}")]
    ElementTypeMismatch { expected: TypeTag, found: TypeTag },

    #[error("a {target} cannot contain itself")]
    RecursiveValue { target: &'static str },

    #[error("undefined builtin function '{name}'")]
    UndefinedBuiltin { name: String },

    #[error("builtin '{name}' expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("builtin '{name}' argument {index} expects {expected}, got {found}")]
    ArgumentType {
        name: String,
        index: usize,
        expected: TypeTag,
        found: TypeTag,
    },

    #[error("builtin '{name}' failed: {message}")]
    Builtin { name: String, message: String },

    #[error("heap address {address} out of range for heap of size {size}")]
    HeapOutOfBounds { address: HeapAddress, size: usize },

    #[error("no '{role}' routine in program")]
    MissingEntryPoint { role: &'static str },

    // internal
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("opcode {0} is not implemented by this machine profile")]
    UnimplementedOpcode(Opcode),

    #[error("{0} requires a field-name operand")]
    MissingFieldOperand(Opcode),

    #[error("{opcode} requires {expected} operand")]
    InvalidOperand {
        opcode: Opcode,
        expected: &'static str,
    },

    #[error("builtin name must be a String, got {found}")]
    BuiltinNameNotString { found: &'static str },

    #[error("builtin '{name}' is declared to return a value but returned none")]
    MissingReturnValue { name: String },

    #[error("builtin '{name}' returned a value but is declared void")]
    UnexpectedReturnValue { name: String },

    // fatal
    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack size limit exceeded ({limit})")]
    StackOverflow { limit: usize },

    #[error("invalid stack access at index {index} (stack length {len})")]
    InvalidStackAccess { index: i64, len: usize },

    #[error("stack slot {index} holds a frame marker, not a value")]
    FrameMarkerAccess { index: usize },

    #[error("return without a matching call")]
    ReturnUnderflow,

    #[error("expected a saved frame marker on top of the stack")]
    MissingFrameMarker,

    #[error("call depth limit exceeded ({limit})")]
    CallDepthExceeded { limit: usize },

    #[error("execution step limit exceeded ({limit})")]
    StepLimitExceeded { limit: u64 },

    #[error("jump out of range: target {target}, code length {len}")]
    JumpOutOfRange { target: i64, len: usize },

    #[error("malformed program: {0}")]
    MalformedProgram(String),
}

impl ErrorKind {
    pub fn severity(&self) -> Severity {
        use ErrorKind::*;
        match self {
            TypeMismatch { .. }
            | UnaryTypeMismatch { .. }
            | ExpectedType { .. }
            | InvalidCast { .. }
            | CastOverflow { .. }
            | Parse { .. }
            | DivisionByZero
            | IndexOutOfRange { .. }
            | EmptyList
            | MissingField { .. }
            | ReadOnlyField { .. }
            | ElementTypeMismatch { .. }
            | RecursiveValue { .. }
            | UndefinedBuiltin { .. }
            | ArityMismatch { .. }
            | ArgumentType { .. }
            | Builtin { .. }
            | HeapOutOfBounds { .. }
            | MissingEntryPoint { .. } => Severity::Runtime,

            UnknownOpcode(_)
            | UnimplementedOpcode(_)
            | MissingFieldOperand(_)
            | InvalidOperand { .. }
            | BuiltinNameNotString { .. }
            | MissingReturnValue { .. }
            | UnexpectedReturnValue { .. } => Severity::Internal,

            StackUnderflow
            | StackOverflow { .. }
            | InvalidStackAccess { .. }
            | FrameMarkerAccess { .. }
            | ReturnUnderflow
            | MissingFrameMarker
            | CallDepthExceeded { .. }
            | StepLimitExceeded { .. }
            | JumpOutOfRange { .. }
            | MalformedProgram(_) => Severity::Fatal,
        }
    }
}

/// An error raised while loading or executing a program.
///
/// Carries the position and opcode of the failing instruction plus a
/// snapshot of the debug call-stack at the moment of failure.
#[derive(Debug, Clone, PartialEq)]
pub struct VmError {
    pub kind: ErrorKind,
    pub position: Option<usize>,
    pub opcode: Option<Opcode>,
    pub call_stack: Vec<String>,
}

impl VmError {
    pub fn new(kind: ErrorKind) -> Self {
        VmError {
            kind,
            position: None,
            opcode: None,
            call_stack: Vec::new(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn at(mut self, position: usize, opcode: Opcode) -> Self {
        self.position = Some(position);
        self.opcode = Some(opcode);
        self
    }

    pub fn with_call_stack(mut self, frames: &[String]) -> Self {
        self.call_stack = frames.to_vec();
        self
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.severity())?;
        match (self.position, self.opcode) {
            (Some(pos), Some(op)) => write!(f, " at {:04} ({})", pos, op)?,
            (Some(pos), None) => write!(f, " at {:04}", pos)?,
            _ => {}
        }
        write!(f, ": {}", self.kind)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().rev().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ErrorKind> for VmError {
    fn from(kind: ErrorKind) -> Self {
        VmError::new(kind)
    }
}

pub type VmResult<T> = Result<T, VmError>;

pub fn type_mismatch(op: &'static str, left: TypeTag, right: TypeTag) -> ErrorKind {
    ErrorKind::TypeMismatch {
        op,
        left: left.name(),
        right: right.name(),
    }
}

pub fn expected_type(expected: &'static str, found: TypeTag) -> ErrorKind {
    ErrorKind::ExpectedType {
        expected,
        found: found.name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classes() {
        assert_eq!(ErrorKind::DivisionByZero.severity(), Severity::Runtime);
        assert_eq!(ErrorKind::UnknownOpcode(9).severity(), Severity::Internal);
        assert_eq!(ErrorKind::ReturnUnderflow.severity(), Severity::Fatal);
    }

    #[test]
    fn test_display_with_position_and_call_stack() {
        let err = VmError::new(ErrorKind::UndefinedBuiltin {
            name: "print".into(),
        })
        .at(12, Opcode::CallBuiltin)
        .with_call_stack(&["state: CallCodeEntry".into(), "main".into()]);

        let text = err.to_string();
        assert!(text.starts_with(
            "runtime error at 0012 (CALL_BUILTIN): undefined builtin function 'print'"
        ));
        assert!(text.contains("0: main"));
        assert!(text.contains("1: state: CallCodeEntry"));
    }

    #[test]
    fn test_plain_display() {
        let err = VmError::from(ErrorKind::StackUnderflow);
        assert_eq!(err.to_string(), "fatal error: stack underflow");
    }
}
