//! Native call bridge between the host and a managed script runtime

mod dispatcher;
pub mod fault;
mod hosting;
mod marshaling;
mod module;
mod native_call;
mod object_bridge;
mod registry;
mod thunk;

pub use dispatcher::{CallFrame, Dispatcher};
pub use fault::{managed_boundary, to_managed_exception};
pub use hosting::{bridge_registry, init_bridge_host};
pub use marshaling::{check_tag, to_managed, to_native, FromManaged, IntoManaged, MarshalError};
pub use module::BindingModule;
pub use native_call::{CallFailure, IntoNativeCall, NativeCall, NativeReturn};
pub use object_bridge::{CallGuard, LifecycleHooks, LifecycleState, ObjectBridge};
pub use registry::{NativeCallRegistry, RegistryBuilder};
pub use thunk::{ManagedRuntime, MethodRef, MethodThunk, ThunkArgs};

use api::{ManagedException, NativeFault, NativeHandle};

/// Errors raised while binding or crossing the native/managed boundary
#[derive(Debug, Clone, thiserror::Error)]
pub enum InteropError {
    #[error("Duplicate binding: {0}")]
    DuplicateBinding(String),
    #[error("Signature mismatch for {member}: implementation is {found}")]
    SignatureMismatch { member: String, found: String },
    #[error("No native implementation bound for {0}")]
    UnboundMember(String),
    #[error(transparent)]
    MarshalType(#[from] MarshalError),
    #[error("{member} expects {expected} argument(s), got {found}")]
    Arity {
        member: String,
        expected: usize,
        found: usize,
    },
    #[error("{member} called on an instance in state {state:?}")]
    InvalidLifecycleState {
        member: String,
        state: LifecycleState,
    },
    #[error("{0} used after release")]
    UseAfterRelease(NativeHandle),
    #[error("Resource behind {handle} is not a {expected}")]
    ResourceType {
        handle: NativeHandle,
        expected: &'static str,
    },
    #[error("Native fault in {member}: {fault}")]
    NativeFault { member: String, fault: NativeFault },
    #[error("Managed exception escaped {member}: {exception}")]
    ManagedFault {
        member: String,
        exception: ManagedException,
    },
    #[error("Failed to initialize bridge host: {0}")]
    HostInit(String),
}

impl InteropError {
    /// Startup errors. These abort initialization instead of surfacing as a
    /// managed exception.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InteropError::DuplicateBinding(_)
                | InteropError::SignatureMismatch { .. }
                | InteropError::HostInit(_)
        )
    }
}
