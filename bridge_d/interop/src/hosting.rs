use log::info;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::registry::{NativeCallRegistry, RegistryBuilder};
use crate::InteropError;

static REGISTRY: OnceCell<Arc<NativeCallRegistry>> = OnceCell::new();

/// Freeze the bindings and install them as the process-wide registry (call once at startup)
pub fn init_bridge_host(builder: RegistryBuilder) -> Result<Arc<NativeCallRegistry>, InteropError> {
    let registry = Arc::new(builder.freeze());
    REGISTRY
        .set(registry.clone())
        .map_err(|_| InteropError::HostInit("Already initialized".into()))?;
    info!("Bridge host initialized");
    Ok(registry)
}

/// The process-wide registry installed by [`init_bridge_host`]
pub fn bridge_registry() -> Result<Arc<NativeCallRegistry>, InteropError> {
    REGISTRY
        .get()
        .cloned()
        .ok_or(InteropError::HostInit("Not initialized".into()))
}
