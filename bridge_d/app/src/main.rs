use anyhow::{bail, Result};
use bridge_d::fixture::{bridge_tests_assembly, register_native_bindings, run_fixture, Journal};
use bridge_d::plugins::{load_plugins, plugins_dir, register_plugins, unload_plugins};
use common::{load_config, BridgeConfig};
use interop::{init_bridge_host, Dispatcher, ObjectBridge, RegistryBuilder};
use log::{debug, error, info, trace, warn};
use script::Domain;
use std::path::Path;
use std::sync::Arc;

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    info!("Starting...");
    debug!("Debug logging is active");
    trace!("Trace logging is active");

    let args: Vec<String> = std::env::args().collect();
    let config_path = Path::new(arg_value(&args, "--config").unwrap_or("bridge_d.json"));
    let report_path = arg_value(&args, "--report").map(Path::new);

    let config = load_config(config_path).unwrap_or_else(|e| {
        error!("Failed to load config: {:#}. Using defaults.", e);
        BridgeConfig::default()
    });
    info!("Loaded Config: {:?}", config);

    let journal = Journal::new();
    let objects = Arc::new(ObjectBridge::new());
    let mut builder = RegistryBuilder::new();
    if let Err(e) = register_native_bindings(&mut builder, &objects, &journal) {
        error!("Failed to register native bindings: {}", e);
        return Err(e.into());
    }

    let mut modules = load_plugins(&plugins_dir(&config.host.native_plugins_dir))?;
    register_plugins(&mut modules, &mut builder)?;
    if modules.is_empty() {
        debug!("No binding modules loaded");
    } else {
        info!("Loaded {} binding module(s)", modules.len());
    }

    let registry = init_bridge_host(builder)?;
    let dispatcher = Dispatcher::with_objects(registry, objects);
    let domain = Domain::new(config.runtime.clone(), dispatcher);
    domain.provide(bridge_tests_assembly(&config.host.assembly)?);

    let mut report = run_fixture(&domain, &config.host.assembly, &journal)?;

    if config.runtime.collect_on_shutdown {
        report.collected = domain.collect();
        info!("Collected {} object(s) at shutdown", report.collected);
    }
    report.journal = journal.entries();

    unload_plugins(&mut modules);

    if let Some(path) = report_path {
        report.write(path)?;
    }

    let failed: Vec<&str> = report.failures().map(|s| s.name.as_str()).collect();
    if failed.is_empty() {
        info!("All {} scenario(s) passed", report.scenarios.len());
    } else {
        warn!("{} scenario(s) failed: {}", failed.len(), failed.join(", "));
        if config.host.abort_on_managed_fault {
            bail!("{} scenario(s) failed", failed.len());
        }
    }

    info!("Shutdown complete.");
    Ok(())
}
