//! Coercion used when a value is stored into a typed slot.

use crate::lang::value::{TypeTag, Value};
use crate::runtime::runtime_error::ErrorKind;

/// Convert `value` to `target`, or fail.
///
/// - Same tag, `Any` and `Null` targets keep the value unchanged.
/// - Float to integer rounds to nearest, ties to even.
/// - Numbers format to strings with the invariant `.` separator.
/// - Strings parse to numbers after trimming surrounding whitespace.
/// - `Bool` only accepts `Bool`.
pub fn try_cast(target: TypeTag, value: &Value) -> Result<Value, ErrorKind> {
    if target == TypeTag::Any || target == TypeTag::Null || value.type_tag() == target {
        return Ok(value.clone());
    }

    let invalid = || ErrorKind::InvalidCast {
        from: value.type_name(),
        to: target,
    };

    match target {
        TypeTag::Byte => match value {
            Value::Int32(_) | Value::Char(_) => {
                let n = value.as_integer().ok_or_else(invalid)?;
                u8::try_from(n).map(Value::Byte).map_err(|_| overflow(value, target))
            }
            Value::Float32(x) => {
                let n = round_to_i64(*x).ok_or_else(|| overflow(value, target))?;
                u8::try_from(n).map(Value::Byte).map_err(|_| overflow(value, target))
            }
            Value::String(s) => parse::<u8>(s, target).map(Value::Byte),
            _ => Err(invalid()),
        },

        TypeTag::Int32 => match value {
            Value::Byte(_) | Value::Char(_) => value.as_integer().map(Value::Int32).ok_or_else(invalid),
            Value::Float32(x) => {
                let n = round_to_i64(*x).ok_or_else(|| overflow(value, target))?;
                i32::try_from(n).map(Value::Int32).map_err(|_| overflow(value, target))
            }
            Value::String(s) => parse::<i32>(s, target).map(Value::Int32),
            _ => Err(invalid()),
        },

        TypeTag::Float32 => match value {
            Value::Byte(_) | Value::Int32(_) | Value::Char(_) => {
                value.as_float().map(Value::Float32).ok_or_else(invalid)
            }
            Value::String(s) => parse::<f32>(s, target).map(Value::Float32),
            _ => Err(invalid()),
        },

        TypeTag::Char => match value {
            Value::Byte(_) | Value::Int32(_) => {
                let n = value.as_integer().ok_or_else(invalid)?;
                char_from(n).ok_or_else(|| overflow(value, target))
            }
            Value::Float32(x) => {
                let n = round_to_i64(*x).ok_or_else(|| overflow(value, target))?;
                i32::try_from(n)
                    .ok()
                    .and_then(char_from)
                    .ok_or_else(|| overflow(value, target))
            }
            Value::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(ErrorKind::Parse {
                        text: s.clone(),
                        target,
                    }),
                }
            }
            _ => Err(invalid()),
        },

        TypeTag::String => match value {
            Value::Byte(_)
            | Value::Int32(_)
            | Value::Float32(_)
            | Value::Char(_)
            | Value::Bool(_) => Ok(Value::String(value.to_string())),
            _ => Err(invalid()),
        },

        // Bool, Struct, List and Reference only accept themselves.
        TypeTag::Bool | TypeTag::Struct | TypeTag::List | TypeTag::Reference => Err(invalid()),

        TypeTag::Any | TypeTag::Null => Ok(value.clone()),
    }
}

/// Cast `value` to the variant currently held by `slot`.
pub fn cast_like(slot: &Value, value: &Value) -> Result<Value, ErrorKind> {
    if let (Value::List(existing), Value::List(incoming)) = (slot, value) {
        let (expected, found) = (existing.borrow().element, incoming.borrow().element);
        if expected != TypeTag::Any && expected != found {
            return Err(ErrorKind::ElementTypeMismatch { expected, found });
        }
    }
    try_cast(slot.type_tag(), value)
}

fn overflow(value: &Value, target: TypeTag) -> ErrorKind {
    ErrorKind::CastOverflow {
        value: value.to_string(),
        to: target,
    }
}

fn round_to_i64(x: f32) -> Option<i64> {
    let rounded = x.round_ties_even();
    if rounded.is_finite() && rounded >= i64::MIN as f32 && rounded <= i64::MAX as f32 {
        Some(rounded as i64)
    } else {
        None
    }
}

/// Characters are limited to a single UTF-16 code unit.
fn char_from(n: i32) -> Option<Value> {
    u16::try_from(n)
        .ok()
        .and_then(|unit| char::from_u32(unit as u32))
        .map(Value::Char)
}

fn parse<T: std::str::FromStr>(text: &str, target: TypeTag) -> Result<T, ErrorKind> {
    text.trim().parse().map_err(|_| ErrorKind::Parse {
        text: text.to_string(),
        target,
    })
}
