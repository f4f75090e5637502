//! Failure conversion at the native/managed boundary.
//!
//! Native failures become managed exceptions raised at the managed call site.
//! Managed exceptions escaping into native code are stopped by
//! [`managed_boundary`] and reported as [`InteropError::ManagedFault`].

use log::{error, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use api::{ManagedException, NativeFault};

use crate::InteropError;

pub const NATIVE_EXCEPTION: &str = "Bridge.NativeException";
pub const MARSHAL_EXCEPTION: &str = "Bridge.MarshalTypeException";
pub const ARITY_EXCEPTION: &str = "Bridge.ArityException";
pub const LIFECYCLE_EXCEPTION: &str = "Bridge.InvalidLifecycleStateException";
pub const RELEASED_EXCEPTION: &str = "Bridge.UseAfterReleaseException";
pub const UNBOUND_EXCEPTION: &str = "Bridge.UnboundMemberException";
pub const BINDING_EXCEPTION: &str = "Bridge.BindingException";
pub const ENGINE_EXCEPTION: &str = "System.ExecutionEngineException";

/// Managed exception type raised for a bridge error.
pub fn exception_type(err: &InteropError) -> &'static str {
    match err {
        InteropError::NativeFault { .. } => NATIVE_EXCEPTION,
        InteropError::MarshalType(_) | InteropError::ResourceType { .. } => MARSHAL_EXCEPTION,
        InteropError::Arity { .. } => ARITY_EXCEPTION,
        InteropError::InvalidLifecycleState { .. } => LIFECYCLE_EXCEPTION,
        InteropError::UseAfterRelease(_) => RELEASED_EXCEPTION,
        InteropError::UnboundMember(_) => UNBOUND_EXCEPTION,
        InteropError::ManagedFault { .. } => ENGINE_EXCEPTION,
        InteropError::DuplicateBinding(_)
        | InteropError::SignatureMismatch { .. }
        | InteropError::HostInit(_) => BINDING_EXCEPTION,
    }
}

/// Turns a failed native call into the exception raised at the managed call site.
///
/// A native fault keeps its message verbatim. A managed fault that travelled
/// through native code is re-raised as the original exception.
pub fn to_managed_exception(err: InteropError) -> ManagedException {
    match err {
        InteropError::NativeFault { fault, .. } => {
            ManagedException::new(NATIVE_EXCEPTION, fault.message)
        }
        InteropError::ManagedFault { exception, .. } => exception,
        other => ManagedException::new(exception_type(&other), other.to_string()),
    }
}

/// The single entry point from native code into managed code.
///
/// Exceptions and panics escaping `f` are converted into
/// [`InteropError::ManagedFault`] carrying `member` as the entry point.
pub fn managed_boundary<T>(
    member: &str,
    f: impl FnOnce() -> Result<T, ManagedException>,
) -> Result<T, InteropError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(exception)) => {
            warn!("Managed exception escaped {}: {}", member, exception);
            Err(InteropError::ManagedFault {
                member: member.to_string(),
                exception,
            })
        }
        Err(payload) => {
            let exception = ManagedException::new(
                ENGINE_EXCEPTION,
                format!("managed runtime panicked: {}", panic_message(&*payload)),
            );
            error!("{} in {}", exception, member);
            Err(InteropError::ManagedFault {
                member: member.to_string(),
                exception,
            })
        }
    }
}

/// Runs native code, turning a panic into a fault instead of unwinding
/// into the caller.
pub(crate) fn catch_native<T, E>(member: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
where
    E: From<NativeFault>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = format!("{} panicked: {}", member, panic_message(&*payload));
        error!("{}", message);
        Err(NativeFault::new(message).into())
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
