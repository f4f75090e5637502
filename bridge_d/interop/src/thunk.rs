//! Typed calls from native code into managed methods.

use std::fmt;
use std::marker::PhantomData;

use api::{ManagedException, MarshaledValue, MemberKind, ObjectId, Signature, ValueTag};

use crate::fault::managed_boundary;
use crate::marshaling::{FromManaged, IntoManaged};
use crate::InteropError;

/// A managed method addressed by owning type, name and parameter count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub type_name: String,
    pub method: String,
    pub arity: usize,
}

impl MethodRef {
    pub fn new(type_name: impl Into<String>, method: impl Into<String>, arity: usize) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
            arity,
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}/{}", self.type_name, self.method, self.arity)
    }
}

/// The managed side as seen from native code.
pub trait ManagedRuntime: Send + Sync {
    /// Declared signature of a managed method, if it exists.
    fn method_signature(&self, method: &MethodRef) -> Option<(Signature, MemberKind)>;

    /// Runs a managed method. Exceptions come back as `Err`.
    fn invoke(
        &self,
        method: &MethodRef,
        this: Option<ObjectId>,
        args: Vec<MarshaledValue>,
    ) -> Result<MarshaledValue, ManagedException>;
}

/// Argument lists a thunk can be called with.
pub trait ThunkArgs {
    fn tags() -> Vec<ValueTag>;

    fn into_values(self) -> Vec<MarshaledValue>;
}

macro_rules! impl_thunk_args {
    ($($arg:ident),*) => {
        impl<$($arg: IntoManaged,)*> ThunkArgs for ($($arg,)*) {
            fn tags() -> Vec<ValueTag> {
                vec![$(<$arg as IntoManaged>::TAG),*]
            }

            #[allow(non_snake_case)]
            fn into_values(self) -> Vec<MarshaledValue> {
                let ($($arg,)*) = self;
                vec![$($arg.into_managed()),*]
            }
        }
    };
}

impl_thunk_args!();
impl_thunk_args!(A1);
impl_thunk_args!(A1, A2);
impl_thunk_args!(A1, A2, A3);
impl_thunk_args!(A1, A2, A3, A4);

/// A managed method bound to a fixed native signature.
///
/// The signature is checked once when the thunk is created; every call runs
/// behind the managed fault boundary.
pub struct MethodThunk<'r, Args, Ret> {
    runtime: &'r dyn ManagedRuntime,
    method: MethodRef,
    this: Option<ObjectId>,
    _marker: PhantomData<fn(Args) -> Ret>,
}

impl<'r, Args: ThunkArgs, Ret: FromManaged> MethodThunk<'r, Args, Ret> {
    pub fn bind(
        runtime: &'r dyn ManagedRuntime,
        method: MethodRef,
        this: Option<ObjectId>,
    ) -> Result<Self, InteropError> {
        let (signature, kind) = runtime
            .method_signature(&method)
            .ok_or_else(|| InteropError::UnboundMember(method.to_string()))?;

        let wanted = Signature::new(Args::tags(), Ret::TAG);
        if signature != wanted {
            return Err(InteropError::SignatureMismatch {
                member: format!("{}{}", method, signature),
                found: wanted.to_string(),
            });
        }
        if kind == MemberKind::Instance && this.is_none() {
            return Err(InteropError::InvalidLifecycleState {
                member: method.to_string(),
                state: crate::LifecycleState::Unconstructed,
            });
        }

        Ok(Self {
            runtime,
            method,
            this,
            _marker: PhantomData,
        })
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn call(&self, args: Args) -> Result<Ret, InteropError> {
        let member = format!("{}::{}", self.method.type_name, self.method.method);
        let value = managed_boundary(&member, || {
            self.runtime
                .invoke(&self.method, self.this, args.into_values())
        })?;
        Ok(Ret::from_managed(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl ManagedRuntime for Doubler {
        fn method_signature(&self, method: &MethodRef) -> Option<(Signature, MemberKind)> {
            match method.method.as_str() {
                "Double" => Some((
                    Signature::new([ValueTag::Int32], ValueTag::Int32),
                    MemberKind::Static,
                )),
                "Throw" => Some((Signature::void(), MemberKind::Static)),
                _ => None,
            }
        }

        fn invoke(
            &self,
            method: &MethodRef,
            _this: Option<ObjectId>,
            args: Vec<MarshaledValue>,
        ) -> Result<MarshaledValue, ManagedException> {
            match (method.method.as_str(), args.as_slice()) {
                ("Double", [MarshaledValue::Int32(v)]) => Ok(MarshaledValue::Int32(v * 2)),
                _ => Err(ManagedException::new("System.Exception", "Hello!")),
            }
        }
    }

    #[test]
    fn test_typed_call() {
        let thunk: MethodThunk<(i32,), i32> =
            MethodThunk::bind(&Doubler, MethodRef::new("T", "Double", 1), None).unwrap();
        assert_eq!(thunk.call((21,)).unwrap(), 42);
    }

    #[test]
    fn test_signature_checked_at_bind() {
        let bound = MethodThunk::<(i64,), i32>::bind(&Doubler, MethodRef::new("T", "Double", 1), None);
        assert!(matches!(bound, Err(InteropError::SignatureMismatch { .. })));

        let missing = MethodThunk::<(), ()>::bind(&Doubler, MethodRef::new("T", "Nope", 0), None);
        assert!(matches!(missing, Err(InteropError::UnboundMember(_))));
    }

    #[test]
    fn test_exception_stops_at_boundary() {
        let thunk: MethodThunk<(), ()> =
            MethodThunk::bind(&Doubler, MethodRef::new("T", "Throw", 0), None).unwrap();
        match thunk.call(()) {
            Err(InteropError::ManagedFault { member, exception }) => {
                assert_eq!(member, "T::Throw");
                assert_eq!(exception.message, "Hello!");
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
