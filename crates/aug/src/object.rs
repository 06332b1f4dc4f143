//! Host-facing values.
//!
//! [`Object`] is the public value type used for extension arguments and
//! results and for `eval`/`call` return values. It owns all its data and
//! can be freely cloned or stored; unlike the internal reference-counted
//! `Value`, it needs no heap for any operation. Conversions deep-copy.

use std::fmt;

use crate::{
    heap::{Heap, HeapData, Map, MapKey, Range, Str},
    value::{UserdataId, Value},
};

/// A value crossing the host boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    None,
    Bool(bool),
    Char(u8),
    Int(i32),
    Float(f32),
    String(String),
    Array(Vec<Object>),
    /// Key/value pairs in insertion order. Keys should be `Int` or
    /// `String`; anything else cannot round-trip into a script map.
    Map(Vec<(Object, Object)>),
    /// Half-open range `[from, to)`.
    Range(i32, i32),
    /// Bytecode address of a script function.
    Function(i32),
    Userdata(UserdataId),
}

impl Object {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric coercion across Bool/Char/Int/Float, for extensions that
    /// accept any number.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(i32::from(*b))),
            Self::Char(c) => Some(f64::from(*c)),
            Self::Int(i) => Some(f64::from(*i)),
            Self::Float(f) => Some(f64::from(*f)),
            _ => None,
        }
    }

    /// Truthiness, mirroring the in-VM coercion.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Char(c) => *c != 0,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Function(addr) => *addr != 0,
            _ => true,
        }
    }
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Object {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for Object {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Char(c) => write!(f, "{}", *c as char),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => {
                let mut buffer = ryu::Buffer::new();
                write!(f, "{}", buffer.format(*v))
            }
            Self::String(s) => write!(f, "{s}"),
            Self::Array(values) => {
                write!(f, "[ ")?;
                for value in values {
                    write!(f, "{value} ")?;
                }
                write!(f, "]")
            }
            Self::Map(pairs) => {
                write!(f, "{{ ")?;
                for (key, value) in pairs {
                    write!(f, "{key} : {value} ")?;
                }
                write!(f, "}}")
            }
            Self::Range(from, to) => write!(f, "{from}:{to}"),
            Self::Function(addr) => write!(f, "function {addr}"),
            Self::Userdata(id) => write!(f, "userdata {}", id.0),
        }
    }
}

/// Deep-copies a runtime value into a host object.
pub(crate) fn value_to_object(value: &Value, heap: &Heap) -> Object {
    match value {
        Value::None => Object::None,
        Value::Bool(b) => Object::Bool(*b),
        Value::Char(c) => Object::Char(*c),
        Value::Int(i) => Object::Int(*i),
        Value::Float(f) => Object::Float(*f),
        Value::Func(addr) => Object::Function(*addr),
        Value::Userdata(id) => Object::Userdata(*id),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => Object::String(s.to_lossy_string()),
            HeapData::Array(values) => Object::Array(values.iter().map(|v| value_to_object(v, heap)).collect()),
            HeapData::Map(map) => Object::Map(
                map.iter()
                    .map(|(key, value)| {
                        let key = match key {
                            MapKey::Int(i) => Object::Int(*i),
                            MapKey::Str(bytes) => Object::String(String::from_utf8_lossy(bytes).into_owned()),
                        };
                        (key, value_to_object(value, heap))
                    })
                    .collect(),
            ),
            HeapData::Range(range) => Object::Range(range.from, range.to),
            // iterators and reserved objects have no host mapping
            HeapData::Iter(_) | HeapData::Object(_) => Object::None,
        },
    }
}

/// Deep-copies a host object into a runtime value, allocating containers on
/// the heap. Map pairs with keys that are not Int or String are dropped.
pub(crate) fn object_to_value(object: &Object, heap: &mut Heap) -> Value {
    match object {
        Object::None => Value::None,
        Object::Bool(b) => Value::Bool(*b),
        Object::Char(c) => Value::Char(*c),
        Object::Int(i) => Value::Int(*i),
        Object::Float(f) => Value::Float(*f),
        Object::Function(addr) => Value::Func(*addr),
        Object::Userdata(id) => Value::Userdata(*id),
        Object::String(s) => {
            let id = heap.allocate(HeapData::Str(Str::from_bytes(s.as_bytes().to_vec())));
            Value::Ref(id)
        }
        Object::Array(objects) => {
            let values: Vec<Value> = objects.iter().map(|o| object_to_value(o, heap)).collect();
            let id = heap.allocate(HeapData::Array(values));
            Value::Ref(id)
        }
        Object::Map(pairs) => {
            let mut map = Map::new();
            for (key, value) in pairs {
                let key = match key {
                    Object::Int(i) => MapKey::Int(*i),
                    Object::String(s) => MapKey::Str(s.as_bytes().to_vec()),
                    _ => continue,
                };
                let value = object_to_value(value, heap);
                if let Some(old) = map.insert(key, value) {
                    old.drop_with_heap(heap);
                }
            }
            let id = heap.allocate(HeapData::Map(map));
            Value::Ref(id)
        }
        Object::Range(from, to) => {
            let id = heap.allocate(HeapData::Range(Range { from: *from, to: *to }));
            Value::Ref(id)
        }
    }
}
