use serde::{Deserialize, Serialize};
use std::fmt;

/// Exact type of a value crossing the boundary.
///
/// Integer and floating-point tags carry width and signedness so that a
/// mismatch is caught instead of silently converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueTag {
    #[serde(alias = "int")]
    Int32,
    #[serde(alias = "long")]
    Int64,
    #[serde(alias = "uint")]
    UInt32,
    #[serde(alias = "ulong")]
    UInt64,
    #[serde(alias = "float")]
    Float32,
    #[serde(alias = "double")]
    Float64,
    #[serde(alias = "bool")]
    Bool,
    #[serde(alias = "string")]
    String,
    #[serde(alias = "object")]
    Object,
    #[serde(alias = "void")]
    Void,
}

impl ValueTag {
    /// Name of the tag as the managed side spells it.
    pub fn managed_name(self) -> &'static str {
        match self {
            ValueTag::Int32 => "int",
            ValueTag::Int64 => "long",
            ValueTag::UInt32 => "uint",
            ValueTag::UInt64 => "ulong",
            ValueTag::Float32 => "float",
            ValueTag::Float64 => "double",
            ValueTag::Bool => "bool",
            ValueTag::String => "string",
            ValueTag::Object => "object",
            ValueTag::Void => "void",
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.managed_name())
    }
}

/// Identity of a managed instance, assigned by the managed runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Opaque reference to the native resource bound to one managed instance.
///
/// Handles are plain numbers handed out by the object bridge and are never
/// reused, so a stale handle can always be told apart from a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeHandle(pub u64);

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// A tagged value as it crosses the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MarshaledValue {
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    String(String),
    Object(NativeHandle),
    Void,
}

impl MarshaledValue {
    pub fn tag(&self) -> ValueTag {
        match self {
            MarshaledValue::Int32(_) => ValueTag::Int32,
            MarshaledValue::Int64(_) => ValueTag::Int64,
            MarshaledValue::UInt32(_) => ValueTag::UInt32,
            MarshaledValue::UInt64(_) => ValueTag::UInt64,
            MarshaledValue::Float32(_) => ValueTag::Float32,
            MarshaledValue::Float64(_) => ValueTag::Float64,
            MarshaledValue::Bool(_) => ValueTag::Bool,
            MarshaledValue::String(_) => ValueTag::String,
            MarshaledValue::Object(_) => ValueTag::Object,
            MarshaledValue::Void => ValueTag::Void,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, MarshaledValue::Void)
    }
}

impl fmt::Display for MarshaledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshaledValue::Int32(v) => write!(f, "{}", v),
            MarshaledValue::Int64(v) => write!(f, "{}L", v),
            MarshaledValue::UInt32(v) => write!(f, "{}u", v),
            MarshaledValue::UInt64(v) => write!(f, "{}UL", v),
            MarshaledValue::Float32(v) => write!(f, "{:?}f", v),
            MarshaledValue::Float64(v) => write!(f, "{:?}", v),
            MarshaledValue::Bool(v) => write!(f, "{}", v),
            MarshaledValue::String(v) => write!(f, "{:?}", v),
            MarshaledValue::Object(h) => write!(f, "{}", h),
            MarshaledValue::Void => f.write_str("void"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_matches_variant() {
        assert_eq!(MarshaledValue::Int32(5).tag(), ValueTag::Int32);
        assert_eq!(MarshaledValue::UInt64(5).tag(), ValueTag::UInt64);
        assert_eq!(MarshaledValue::Float32(1.5).tag(), ValueTag::Float32);
        assert_eq!(
            MarshaledValue::Object(NativeHandle(3)).tag(),
            ValueTag::Object
        );
        assert!(MarshaledValue::Void.is_void());
    }

    #[test]
    fn test_tag_accepts_managed_names_in_json() {
        let tags: Vec<ValueTag> = serde_json::from_str(r#"["int", "Float64", "string"]"#).unwrap();
        assert_eq!(
            tags,
            vec![ValueTag::Int32, ValueTag::Float64, ValueTag::String]
        );
    }
}
