//! Operators over [`Value`].
//!
//! Numeric promotion works in three tiers:
//! 1. `Byte op Byte` computes in `i32` and narrows back to `Byte` when the
//!    result fits in `0..=255`, otherwise yields `Int32`.
//! 2. Any mix of `Byte`, `Int32` and `Char` computes as wrapping `i32`.
//! 3. Anything involving a `Float32` computes as `f32`.
//!
//! Bit operators take `Byte` and `Int32` only.
//!
//! `String + x` and `x + String` concatenate the display forms.

use crate::lang::value::Value;
use crate::runtime::runtime_error::{ErrorKind, type_mismatch};

type OpResult = Result<Value, ErrorKind>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }

    fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Shl | BinaryOp::Shr
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn symbol(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Gt => ">",
            Comparison::Le => "<=",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

fn int_op(op: BinaryOp, a: i32, b: i32) -> Result<i32, ErrorKind> {
    Ok(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(ErrorKind::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(ErrorKind::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        // shift count is masked to five bits like native 32-bit shifts
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
    })
}

fn float_op(op: BinaryOp, a: f32, b: f32) -> Option<f32> {
    match op {
        BinaryOp::Add => Some(a + b),
        BinaryOp::Sub => Some(a - b),
        BinaryOp::Mul => Some(a * b),
        BinaryOp::Div => Some(a / b),
        BinaryOp::Mod => Some(a % b),
        _ => None,
    }
}

/// Apply a binary arithmetic or bitwise operator.
pub fn binary(op: BinaryOp, a: &Value, b: &Value) -> OpResult {
    let mismatch = || type_mismatch(op.symbol(), a.type_tag(), b.type_tag());

    match (a, b) {
        (Value::Byte(x), Value::Byte(y)) => {
            let wide = int_op(op, *x as i32, *y as i32)?;
            Ok(match u8::try_from(wide) {
                Ok(narrow) => Value::Byte(narrow),
                Err(_) => Value::Int32(wide),
            })
        }

        (Value::Bool(x), Value::Bool(y)) => match op {
            BinaryOp::And => Ok(Value::Bool(x & y)),
            BinaryOp::Or => Ok(Value::Bool(x | y)),
            BinaryOp::Xor => Ok(Value::Bool(x ^ y)),
            _ => Err(mismatch()),
        },

        (Value::String(_), _) | (_, Value::String(_)) if op == BinaryOp::Add => {
            Ok(Value::String(format!("{}{}", a, b)))
        }

        _ => {
            if op.is_bitwise() {
                // Char joins arithmetic but not bit operations.
                let bits = |v: &Value| match v {
                    Value::Byte(n) => Some(*n as i32),
                    Value::Int32(n) => Some(*n),
                    _ => None,
                };
                return match (bits(a), bits(b)) {
                    (Some(x), Some(y)) => int_op(op, x, y).map(Value::Int32),
                    _ => Err(mismatch()),
                };
            }
            if let (Some(x), Some(y)) = (a.as_integer(), b.as_integer()) {
                return int_op(op, x, y).map(Value::Int32);
            }
            match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => float_op(op, x, y)
                    .map(Value::Float32)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            }
        }
    }
}

pub fn add(a: &Value, b: &Value) -> OpResult {
    binary(BinaryOp::Add, a, b)
}

pub fn sub(a: &Value, b: &Value) -> OpResult {
    binary(BinaryOp::Sub, a, b)
}

pub fn mul(a: &Value, b: &Value) -> OpResult {
    binary(BinaryOp::Mul, a, b)
}

pub fn div(a: &Value, b: &Value) -> OpResult {
    binary(BinaryOp::Div, a, b)
}

pub fn rem(a: &Value, b: &Value) -> OpResult {
    binary(BinaryOp::Mod, a, b)
}

/// Logical not on `Bool`, bitwise complement on `Byte` and `Int32`.
pub fn not(a: &Value) -> OpResult {
    match a {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        Value::Byte(b) => Ok(Value::Byte(!b)),
        Value::Int32(n) => Ok(Value::Int32(!n)),
        other => Err(ErrorKind::UnaryTypeMismatch {
            op: "!",
            operand: other.type_name(),
        }),
    }
}

/// Unary minus. `Byte` and `Char` promote to `Int32` since they are unsigned.
pub fn negate(a: &Value) -> OpResult {
    match a {
        Value::Int32(n) => Ok(Value::Int32(n.wrapping_neg())),
        Value::Float32(x) => Ok(Value::Float32(-x)),
        Value::Byte(_) | Value::Char(_) => Ok(Value::Int32(
            a.as_integer().unwrap_or_default().wrapping_neg(),
        )),
        other => Err(ErrorKind::UnaryTypeMismatch {
            op: "-",
            operand: other.type_name(),
        }),
    }
}

/// Structural equality used by `==` and `!=`.
///
/// Numbers compare by value across variants. `Null` equals only `Null`
/// and compares unequal to anything else. Other variants must match.
pub fn equals(a: &Value, b: &Value) -> Result<bool, ErrorKind> {
    let mismatch = || type_mismatch("==", a.type_tag(), b.type_tag());

    match (a, b) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Null, _) | (_, Value::Null) => Ok(false),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::String(x), Value::String(y)) => Ok(x == y),
        (Value::Reference(x), Value::Reference(y)) => Ok(x == y),
        (Value::Struct(x), Value::Struct(y)) => {
            if std::rc::Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.name != y.name || x.fields.len() != y.fields.len() {
                return Ok(false);
            }
            for (name, xv) in &x.fields {
                match y.fields.get(name) {
                    Some(yv) if equals(xv, yv)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::List(x), Value::List(y)) => {
            if std::rc::Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.element != y.element || x.items.len() != y.items.len() {
                return Ok(false);
            }
            for (xv, yv) in x.items.iter().zip(&y.items) {
                if !equals(xv, yv)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x == y),
            _ => Err(mismatch()),
        },
    }
}

/// Evaluate a comparison operator, producing a `Bool`.
pub fn compare(cmp: Comparison, a: &Value, b: &Value) -> OpResult {
    let result = match cmp {
        Comparison::Eq => equals(a, b)?,
        Comparison::Ne => !equals(a, b)?,
        ordering => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => ordered(ordering, x, y),
            _ => return Err(type_mismatch(ordering.symbol(), a.type_tag(), b.type_tag())),
        },
    };
    Ok(Value::Bool(result))
}

fn ordered(cmp: Comparison, x: f64, y: f64) -> bool {
    match cmp {
        Comparison::Lt => x < y,
        Comparison::Gt => x > y,
        Comparison::Le => x <= y,
        Comparison::Ge => x >= y,
        Comparison::Eq => x == y,
        Comparison::Ne => x != y,
    }
}
