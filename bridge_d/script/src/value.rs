use std::fmt;
use std::sync::Arc;

use api::{ObjectId, ValueTag};

/// A value as managed code sees it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Void,
    Null,
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    String(Arc<str>),
    Object(ObjectId),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    /// Whether the value can be stored in a slot of type `tag`.
    ///
    /// `null` fits any reference slot.
    pub fn fits(&self, tag: ValueTag) -> bool {
        match self {
            Value::Void => tag == ValueTag::Void,
            Value::Null => matches!(tag, ValueTag::Object | ValueTag::String),
            Value::Int32(_) => tag == ValueTag::Int32,
            Value::Int64(_) => tag == ValueTag::Int64,
            Value::UInt32(_) => tag == ValueTag::UInt32,
            Value::UInt64(_) => tag == ValueTag::UInt64,
            Value::Float32(_) => tag == ValueTag::Float32,
            Value::Float64(_) => tag == ValueTag::Float64,
            Value::Bool(_) => tag == ValueTag::Bool,
            Value::String(_) => tag == ValueTag::String,
            Value::Object(_) => tag == ValueTag::Object,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Null => f.write_str("null"),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
            Value::Object(id) => write!(f, "{}", id),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from!(
    i32 => Int32,
    i64 => Int64,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    bool => Bool,
    ObjectId => Object
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Void
    }
}
