//! Host-provided functions callable from bytecode by name.
//!
//! Caller convention: push the arguments left to right, push the name as
//! a `String`, then `CALL_BUILTIN argc`. The callback receives the
//! arguments in push order and returns `Some(value)` exactly when the
//! function is declared to return one.

use std::collections::HashMap;
use std::fmt;

use crate::bytecode::BuiltinSignature;
use crate::lang::value::{TypeTag, Value};
use crate::runtime::runtime_error::ErrorKind;

pub type BuiltinCallback = Box<dyn FnMut(&[Value]) -> Result<Option<Value>, ErrorKind>>;

pub struct BuiltinFunction {
    pub signature: BuiltinSignature,
    callback: BuiltinCallback,
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct BuiltinRegistry {
    functions: HashMap<String, BuiltinFunction>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function. Re-registering a name replaces the old entry.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        parameters: Vec<TypeTag>,
        returns_value: bool,
        callback: F,
    ) -> &mut Self
    where
        F: FnMut(&[Value]) -> Result<Option<Value>, ErrorKind> + 'static,
    {
        let name = name.into();
        if self.functions.contains_key(&name) {
            tracing::warn!(builtin = %name, "builtin registered twice, keeping the latest");
        }
        let signature = BuiltinSignature {
            name: name.clone(),
            parameters,
            returns_value,
        };
        self.functions.insert(
            name,
            BuiltinFunction {
                signature,
                callback: Box::new(callback),
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn signature(&self, name: &str) -> Option<&BuiltinSignature> {
        self.functions.get(name).map(|f| &f.signature)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Check `args` against the declared signature and run the callback.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, ErrorKind> {
        let function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| ErrorKind::UndefinedBuiltin {
                name: name.to_string(),
            })?;

        let parameters = &function.signature.parameters;
        if parameters.len() != args.len() {
            return Err(ErrorKind::ArityMismatch {
                name: name.to_string(),
                expected: parameters.len(),
                found: args.len(),
            });
        }
        for (index, (expected, arg)) in parameters.iter().zip(args).enumerate() {
            if !expected.accepts(arg) {
                return Err(ErrorKind::ArgumentType {
                    name: name.to_string(),
                    index,
                    expected: *expected,
                    found: arg.type_tag(),
                });
            }
        }

        tracing::trace!(builtin = name, argc = args.len(), "calling builtin");
        let result = (function.callback)(args)?;

        match (function.signature.returns_value, result) {
            (true, None) => Err(ErrorKind::MissingReturnValue {
                name: name.to_string(),
            }),
            (false, Some(_)) => Err(ErrorKind::UnexpectedReturnValue {
                name: name.to_string(),
            }),
            (_, result) => Ok(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn registry() -> BuiltinRegistry {
        let mut registry = BuiltinRegistry::new();
        registry.register("max", vec![TypeTag::Int32, TypeTag::Int32], true, |args| {
            let a = args[0].as_integer().unwrap_or_default();
            let b = args[1].as_integer().unwrap_or_default();
            Ok(Some(Value::Int32(a.max(b))))
        });
        registry
    }

    #[test]
    fn test_invoke_returns_value() {
        let result = registry().invoke("max", &[Value::Int32(3), Value::Int32(8)]);
        assert_eq!(result, Ok(Some(Value::Int32(8))));
    }

    #[test]
    fn test_undefined_name() {
        let err = registry().invoke("min", &[]).unwrap_err();
        assert_eq!(err, ErrorKind::UndefinedBuiltin { name: "min".into() });
        assert!(err.to_string().contains("min"));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = registry().invoke("max", &[Value::Int32(1)]).unwrap_err();
        assert_eq!(
            err,
            ErrorKind::ArityMismatch {
                name: "max".into(),
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_argument_type_mismatch() {
        let err = registry()
            .invoke("max", &[Value::Int32(1), Value::string("2")])
            .unwrap_err();
        assert_eq!(
            err,
            ErrorKind::ArgumentType {
                name: "max".into(),
                index: 1,
                expected: TypeTag::Int32,
                found: TypeTag::String
            }
        );
    }

    #[test]
    fn test_any_parameter_accepts_everything() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut registry = BuiltinRegistry::new();
        registry.register("print", vec![TypeTag::Any], false, move |args| {
            sink.borrow_mut().push(args[0].to_string());
            Ok(None)
        });
        registry.invoke("print", &[Value::Bool(true)]).unwrap();
        registry.invoke("print", &[Value::Null]).unwrap();
        assert_eq!(*seen.borrow(), vec!["true", "null"]);
    }

    #[test]
    fn test_missing_return_value_is_internal_error() {
        let mut registry = BuiltinRegistry::new();
        registry.register("broken", vec![], true, |_| Ok(None));
        assert_eq!(
            registry.invoke("broken", &[]),
            Err(ErrorKind::MissingReturnValue {
                name: "broken".into()
            })
        );
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = registry();
        registry.register("max", vec![], true, |_| Ok(Some(Value::Int32(0))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.invoke("max", &[]), Ok(Some(Value::Int32(0))));
    }
}
