use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Index of a cell in the VM heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapAddress(pub usize);

impl fmt::Display for HeapAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Type tag of a runtime value.
///
/// `Any` never describes a value; it is only used where a slot accepts
/// every kind (untyped lists, loosely-typed builtin parameters, casts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Any,
    Null,
    Byte,
    Int32,
    Float32,
    Char,
    Bool,
    String,
    Struct,
    List,
    Reference,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Any => "Any",
            TypeTag::Null => "Null",
            TypeTag::Byte => "Byte",
            TypeTag::Int32 => "Int32",
            TypeTag::Float32 => "Float32",
            TypeTag::Char => "Char",
            TypeTag::Bool => "Bool",
            TypeTag::String => "String",
            TypeTag::Struct => "Struct",
            TypeTag::List => "List",
            TypeTag::Reference => "Reference",
        }
    }

    /// Whether a value of this tag may be stored where `self` is expected.
    pub fn accepts(self, value: &Value) -> bool {
        self == TypeTag::Any || self == value.type_tag()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named record with ordered fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructValue {
    pub name: String,
    pub fields: IndexMap<String, Value>,
}

impl StructValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// A growable sequence whose items all match `element`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListValue {
    pub element: TypeTag,
    pub items: Vec<Value>,
}

impl ListValue {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Runtime value of the machine.
///
/// Primitive variants are plain data. `Struct` and `List` are shared
/// handles: cloning a `Value` aliases the container, so a list loaded
/// from a local and mutated on the stack is mutated in the local too.
/// Use [`Value::copy`] or [`Value::copy_recursive`] to break the alias.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,

    /// Unsigned 8-bit integer.
    Byte(u8),

    /// Signed 32-bit integer.
    Int32(i32),

    /// 32-bit IEEE float.
    Float32(f32),

    /// A single UTF-16 code unit worth of text.
    Char(char),

    Bool(bool),

    String(String),

    Struct(Rc<RefCell<StructValue>>),

    List(Rc<RefCell<ListValue>>),

    /// Explicit pointer to a heap cell.
    Reference(HeapAddress),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn new_struct(value: StructValue) -> Self {
        Value::Struct(Rc::new(RefCell::new(value)))
    }

    pub fn new_list(element: TypeTag, items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(ListValue { element, items })))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::Null,
            Value::Byte(_) => TypeTag::Byte,
            Value::Int32(_) => TypeTag::Int32,
            Value::Float32(_) => TypeTag::Float32,
            Value::Char(_) => TypeTag::Char,
            Value::Bool(_) => TypeTag::Bool,
            Value::String(_) => TypeTag::String,
            Value::Struct(_) => TypeTag::Struct,
            Value::List(_) => TypeTag::List,
            Value::Reference(_) => TypeTag::Reference,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_tag().name()
    }

    /// Name reported by `TYPE_GET`. Structs report their declared name,
    /// lists their element type.
    pub fn describe_type(&self) -> String {
        match self {
            Value::Struct(s) => s.borrow().name.clone(),
            Value::List(l) => format!("List<{}>", l.borrow().element),
            other => other.type_name().to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of `Byte`, `Int32` and `Char`.
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Byte(b) => Some(*b as i32),
            Value::Int32(n) => Some(*n),
            Value::Char(c) => Some(*c as u32 as i32),
            _ => None,
        }
    }

    /// Float view of every numeric variant.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float32(x) => Some(*x),
            other => other.as_integer().map(|n| n as f32),
        }
    }

    /// Wide float view used by ordering comparisons so that large
    /// `Int32` values compare exactly.
    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(x) => Some(*x as f64),
            other => other.as_integer().map(f64::from),
        }
    }

    /// Length for `.Length` on strings and lists.
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::List(l) => Some(l.borrow().len()),
            _ => None,
        }
    }

    /// Shallow copy: a fresh top-level container whose nested
    /// composites stay aliased.
    pub fn copy(&self) -> Value {
        match self {
            Value::Struct(s) => Value::new_struct(s.borrow().clone()),
            Value::List(l) => {
                let list = l.borrow();
                Value::new_list(list.element, list.items.clone())
            }
            other => other.clone(),
        }
    }

    /// Deep copy: no container in the result is shared with `self`.
    pub fn copy_recursive(&self) -> Value {
        match self {
            Value::Struct(s) => {
                let s = s.borrow();
                let fields = s
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.copy_recursive()))
                    .collect();
                Value::new_struct(StructValue {
                    name: s.name.clone(),
                    fields,
                })
            }
            Value::List(l) => {
                let l = l.borrow();
                let items = l.items.iter().map(Value::copy_recursive).collect();
                Value::new_list(l.element, items)
            }
            other => other.clone(),
        }
    }

    /// Whether two values are handles to the same container.
    pub fn same_container(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Whether `target` is `self` or nested anywhere inside it.
    ///
    /// The machine refuses to create cycles, so the walk terminates.
    pub fn reaches(&self, target: &Value) -> bool {
        if self.same_container(target) {
            return true;
        }
        match self {
            Value::Struct(s) => s.borrow().fields.values().any(|v| v.reaches(target)),
            Value::List(l) => l.borrow().items.iter().any(|v| v.reaches(target)),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Byte(b) => write!(f, "{}", b),
            Value::Int32(n) => write!(f, "{}", n),
            Value::Float32(x) => write!(f, "{}", x),
            Value::Char(c) => write!(f, "{}", c),
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::Struct(s) => {
                let s = s.borrow();
                write!(f, "{} {{", s.name)?;
                for (i, (name, value)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {}", name, value)?;
                }
                write!(f, " }}")
            }
            Value::List(l) => {
                write!(f, "[")?;
                for (i, item) in l.borrow().items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Reference(addr) => write!(f, "{}", addr),
        }
    }
}

impl From<u8> for Value {
    fn from(b: u8) -> Self {
        Value::Byte(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int32(n)
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float32(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
