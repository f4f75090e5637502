//! Conversion between boundary values and native Rust types.
//!
//! Every conversion is exact: the tag of the value must be the tag of the
//! native type. There is no widening, narrowing or sign change.

use api::{MarshaledValue, NativeHandle, ValueTag};

/// A value whose tag did not match the declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct MarshalError {
    pub expected: ValueTag,
    pub found: ValueTag,
}

/// Native type that can be built from a boundary value.
pub trait FromManaged: Sized {
    const TAG: ValueTag;

    fn from_managed(value: &MarshaledValue) -> Result<Self, MarshalError>;
}

/// Native type that can be handed across the boundary.
pub trait IntoManaged {
    const TAG: ValueTag;

    fn into_managed(self) -> MarshaledValue;
}

macro_rules! marshal_copy {
    ($ty:ty, $variant:ident) => {
        impl FromManaged for $ty {
            const TAG: ValueTag = ValueTag::$variant;

            fn from_managed(value: &MarshaledValue) -> Result<Self, MarshalError> {
                match value {
                    MarshaledValue::$variant(v) => Ok(*v),
                    other => Err(mismatch(ValueTag::$variant, other)),
                }
            }
        }

        impl IntoManaged for $ty {
            const TAG: ValueTag = ValueTag::$variant;

            fn into_managed(self) -> MarshaledValue {
                MarshaledValue::$variant(self)
            }
        }
    };
}

marshal_copy!(i32, Int32);
marshal_copy!(i64, Int64);
marshal_copy!(u32, UInt32);
marshal_copy!(u64, UInt64);
marshal_copy!(f32, Float32);
marshal_copy!(f64, Float64);
marshal_copy!(bool, Bool);
marshal_copy!(NativeHandle, Object);

// Strings are copied on the way in; the caller keeps its own buffer.
impl FromManaged for String {
    const TAG: ValueTag = ValueTag::String;

    fn from_managed(value: &MarshaledValue) -> Result<Self, MarshalError> {
        match value {
            MarshaledValue::String(s) => Ok(s.clone()),
            other => Err(mismatch(ValueTag::String, other)),
        }
    }
}

impl IntoManaged for String {
    const TAG: ValueTag = ValueTag::String;

    fn into_managed(self) -> MarshaledValue {
        MarshaledValue::String(self)
    }
}

impl IntoManaged for &str {
    const TAG: ValueTag = ValueTag::String;

    fn into_managed(self) -> MarshaledValue {
        MarshaledValue::String(self.to_owned())
    }
}

impl FromManaged for () {
    const TAG: ValueTag = ValueTag::Void;

    fn from_managed(value: &MarshaledValue) -> Result<Self, MarshalError> {
        match value {
            MarshaledValue::Void => Ok(()),
            other => Err(mismatch(ValueTag::Void, other)),
        }
    }
}

impl IntoManaged for () {
    const TAG: ValueTag = ValueTag::Void;

    fn into_managed(self) -> MarshaledValue {
        MarshaledValue::Void
    }
}

fn mismatch(expected: ValueTag, found: &MarshaledValue) -> MarshalError {
    MarshalError {
        expected,
        found: found.tag(),
    }
}

/// Fails unless `value` carries exactly `expected`.
pub fn check_tag(value: &MarshaledValue, expected: ValueTag) -> Result<(), MarshalError> {
    if value.tag() == expected {
        Ok(())
    } else {
        Err(mismatch(expected, value))
    }
}

/// Converts a boundary value into the native type `T`.
pub fn to_native<T: FromManaged>(value: &MarshaledValue) -> Result<T, MarshalError> {
    T::from_managed(value)
}

/// Converts a native value for a slot declared as `expected`.
pub fn to_managed<T: IntoManaged>(
    value: T,
    expected: ValueTag,
) -> Result<MarshaledValue, MarshalError> {
    if T::TAG != expected {
        return Err(MarshalError {
            expected,
            found: T::TAG,
        });
    }
    Ok(value.into_managed())
}
