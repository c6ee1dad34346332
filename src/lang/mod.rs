//! # Cinder runtime values
//!
//! The value model shared by the bytecode, the dispatcher and host
//! builtins.
//!
//! ## Documentation conventions
//!
//! - Stack effects are written as `( before -- after )`, top of stack rightmost.
//! - `List<T>` denotes a list whose declared element type is `T`.

pub mod arith;
pub mod cast;
pub mod value;
