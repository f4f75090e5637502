//! Reference managed runtime hosting scripts that call into native bindings

mod assembly;
mod context;
mod domain;
mod value;

pub use assembly::{
    Assembly, AssemblyBuilder, AssemblyDef, Class, ClassBuilder, ClassInstance, Method, MethodBody,
};
pub use context::ManagedContext;
pub use domain::Domain;
pub use value::Value;

use api::ManagedException;
use interop::InteropError;

/// Managed exception types raised by the runtime itself
pub mod exceptions {
    pub const EXCEPTION: &str = "System.Exception";
    pub const ARGUMENT: &str = "System.ArgumentException";
    pub const ARGUMENT_OUT_OF_RANGE: &str = "System.ArgumentOutOfRangeException";
    pub const INVALID_CAST: &str = "System.InvalidCastException";
    pub const NULL_REFERENCE: &str = "System.NullReferenceException";
    pub const MISSING_METHOD: &str = "System.MissingMethodException";
    pub const TYPE_LOAD: &str = "System.TypeLoadException";
    pub const STACK_OVERFLOW: &str = "System.StackOverflowException";
}

/// Errors returned to native code by the runtime
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Assembly not found: {0}")]
    AssemblyNotFound(String),
    #[error("Class not found: {0}")]
    ClassNotFound(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Ambiguous extern declaration: {0}")]
    AmbiguousExtern(String),
    #[error(transparent)]
    Binding(#[from] InteropError),
    #[error("Unhandled managed exception: {0}")]
    Exception(#[from] ManagedException),
}
