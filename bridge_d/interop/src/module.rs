use anyhow::Result;
use api::ModuleLogger;

use crate::registry::RegistryBuilder;
use crate::InteropError;

/// A native plugin contributing bindings to the registry.
///
/// Plugins export `create_module`, returning a boxed implementation.
pub trait BindingModule {
    fn name(&self) -> &str;
    fn initialize(&mut self, logger: ModuleLogger) -> Result<()>;
    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), InteropError>;
    fn unload(&mut self);
}
