use anyhow::{Context, Result};
use api::{LogLevel, ModuleLogger};
use interop::{BindingModule, RegistryBuilder};
use libloading::{Library, Symbol};
use log::{debug, error, info, trace, warn};
use std::ffi::c_char;
use std::fs;
use std::path::{Path, PathBuf};

pub struct LoadedModule {
    pub name: String,
    pub module: Box<dyn BindingModule>,
}

pub extern "C" fn module_log_callback(level: LogLevel, target: *const c_char, message: *const c_char) {
    unsafe {
        let target_str = std::ffi::CStr::from_ptr(target)
            .to_str()
            .unwrap_or("unknown");
        let message_str = std::ffi::CStr::from_ptr(message).to_str().unwrap_or("");

        match level {
            LogLevel::Error => error!(target: target_str, "{}", message_str),
            LogLevel::Warn => warn!(target: target_str, "{}", message_str),
            LogLevel::Info => info!(target: target_str, "{}", message_str),
            LogLevel::Debug => debug!(target: target_str, "{}", message_str),
            LogLevel::Trace => trace!(target: target_str, "{}", message_str),
        }
    }
}

/// Resolves the plugin directory, falling back to `../<dir>` when started
/// from a build directory.
pub fn plugins_dir(configured: &str) -> PathBuf {
    let dir = Path::new(configured).to_path_buf();
    if !dir.exists() {
        let parent = Path::new("..").join(configured);
        if parent.exists() {
            return parent;
        }
    }
    dir
}

fn is_plugin(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "dll" || ext == "so" || ext == "dylib")
}

fn open_module(path: &Path) -> Result<Box<dyn BindingModule>> {
    unsafe {
        let lib = Library::new(path)?;
        let func: Symbol<unsafe extern "C" fn() -> *mut dyn BindingModule> =
            lib.get(b"create_module")?;
        let module = Box::from_raw(func());
        // The module's code must stay mapped for the life of the process.
        std::mem::forget(lib);
        Ok(module)
    }
}

/// Loads every native binding module in `dir`.
///
/// A module that fails to load is logged and skipped.
pub fn load_plugins(dir: &Path) -> Result<Vec<LoadedModule>> {
    let mut modules = Vec::new();

    if !dir.exists() {
        warn!("{:?} directory not found. Creating it.", dir);
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        return Ok(modules);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_plugin(&path) {
            continue;
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        info!("Loading module: {:?}", path);
        match open_module(&path) {
            Ok(module) => {
                info!("✓ Successfully loaded module: {}", filename);
                modules.push(LoadedModule {
                    name: filename,
                    module,
                });
            }
            Err(e) => error!("✗ Failed to load module {:?}: {}", path, e),
        }
    }

    Ok(modules)
}

/// Initializes every loaded module and lets it add its bindings.
///
/// Initialization failures drop the module. A registration failure is a
/// binding error and aborts startup.
pub fn register_plugins(
    modules: &mut Vec<LoadedModule>,
    builder: &mut RegistryBuilder,
) -> Result<()> {
    modules.retain_mut(|loaded| {
        let logger_name = format!("bridge_d::plugins::{}", loaded.name);
        let logger = ModuleLogger::new(module_log_callback, logger_name);
        match loaded.module.initialize(logger) {
            Ok(()) => {
                info!("✓ Initialized module: {}", loaded.name);
                true
            }
            Err(e) => {
                error!("✗ Failed to initialize module {}: {}", loaded.name, e);
                false
            }
        }
    });

    for loaded in modules.iter() {
        let before = builder.len();
        loaded
            .module
            .register(builder)
            .with_context(|| format!("Module {} failed to register its bindings", loaded.name))?;
        info!(
            "Module {} ({}) registered {} binding(s)",
            loaded.name,
            loaded.module.name(),
            builder.len() - before
        );
    }
    Ok(())
}

pub fn unload_plugins(modules: &mut [LoadedModule]) {
    for loaded in modules.iter_mut() {
        info!("Unloading module: {}", loaded.name);
        loaded.module.unload();
    }
}
