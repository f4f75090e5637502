//! Type-erased native implementations and the adapters that build them from
//! ordinary Rust functions.

use std::fmt;
use std::sync::Arc;

use api::{MarshaledValue, NativeFault, ValueTag};

use crate::marshaling::{FromManaged, IntoManaged, MarshalError};

/// Why a native call did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum CallFailure {
    Marshal(MarshalError),
    Arity { expected: usize, found: usize },
    Fault(NativeFault),
}

impl From<MarshalError> for CallFailure {
    fn from(err: MarshalError) -> Self {
        CallFailure::Marshal(err)
    }
}

impl From<NativeFault> for CallFailure {
    fn from(fault: NativeFault) -> Self {
        CallFailure::Fault(fault)
    }
}

type NativeFn = dyn Fn(&[MarshaledValue]) -> Result<MarshaledValue, CallFailure> + Send + Sync;

/// A native implementation together with the signature derived from it.
#[derive(Clone)]
pub struct NativeCall {
    params: Vec<ValueTag>,
    ret: ValueTag,
    func: Arc<NativeFn>,
}

impl NativeCall {
    /// Wraps an untyped implementation. `params` and `ret` describe what it
    /// accepts and returns; the dispatcher enforces them on every call.
    pub fn from_raw<F>(params: Vec<ValueTag>, ret: ValueTag, func: F) -> Self
    where
        F: Fn(&[MarshaledValue]) -> Result<MarshaledValue, NativeFault> + Send + Sync + 'static,
    {
        Self {
            params,
            ret,
            func: Arc::new(move |args: &[MarshaledValue]| {
                func(args).map_err(CallFailure::Fault)
            }),
        }
    }

    pub fn params(&self) -> &[ValueTag] {
        &self.params
    }

    pub fn ret(&self) -> ValueTag {
        self.ret
    }

    /// True when both refer to the same registered implementation.
    pub fn same_as(&self, other: &NativeCall) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }

    pub(crate) fn call(&self, args: &[MarshaledValue]) -> Result<MarshaledValue, CallFailure> {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCall")
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish_non_exhaustive()
    }
}

/// Return types a native implementation may use.
///
/// `Err(NativeFault)` is the failure channel; it is never confused with a
/// returned value.
pub trait NativeReturn {
    const TAG: ValueTag;

    fn into_result(self) -> Result<MarshaledValue, NativeFault>;
}

macro_rules! native_return {
    ($($ty:ty),*) => {
        $(
            impl NativeReturn for $ty {
                const TAG: ValueTag = <$ty as IntoManaged>::TAG;

                fn into_result(self) -> Result<MarshaledValue, NativeFault> {
                    Ok(self.into_managed())
                }
            }

            impl NativeReturn for Result<$ty, NativeFault> {
                const TAG: ValueTag = <$ty as IntoManaged>::TAG;

                fn into_result(self) -> Result<MarshaledValue, NativeFault> {
                    self.map(IntoManaged::into_managed)
                }
            }
        )*
    };
}

native_return!(i32, i64, u32, u64, f32, f64, bool, String, api::NativeHandle, ());

/// Conversion of a Rust function into a [`NativeCall`].
///
/// Implemented for `Fn(A1, .., An) -> R` up to six parameters, where every
/// parameter is [`FromManaged`] and `R` is a [`NativeReturn`].
pub trait IntoNativeCall<Args> {
    fn into_native_call(self) -> NativeCall;
}

macro_rules! impl_into_native_call {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> IntoNativeCall<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: NativeReturn,
            $($arg: FromManaged,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_native_call(self) -> NativeCall {
                let params: Vec<ValueTag> = vec![$(<$arg as FromManaged>::TAG),*];
                let arity = params.len();
                let func = move |args: &[MarshaledValue]| -> Result<MarshaledValue, CallFailure> {
                    if args.len() != arity {
                        return Err(CallFailure::Arity {
                            expected: arity,
                            found: args.len(),
                        });
                    }
                    let mut args = args.iter();
                    $(
                        let value = args.next().ok_or(CallFailure::Arity {
                            expected: arity,
                            found: 0,
                        })?;
                        let $arg = <$arg as FromManaged>::from_managed(value)?;
                    )*
                    (self)($($arg),*).into_result().map_err(CallFailure::Fault)
                };
                NativeCall {
                    params,
                    ret: R::TAG,
                    func: Arc::new(func),
                }
            }
        }
    };
}

impl_into_native_call!();
impl_into_native_call!(A1);
impl_into_native_call!(A1, A2);
impl_into_native_call!(A1, A2, A3);
impl_into_native_call!(A1, A2, A3, A4);
impl_into_native_call!(A1, A2, A3, A4, A5);
impl_into_native_call!(A1, A2, A3, A4, A5, A6);
