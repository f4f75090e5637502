use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings for the managed runtime domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name of the application domain created at startup
    pub domain: String,
    /// Managed call depth before `System.StackOverflowException` is raised
    pub max_call_depth: usize,
    /// Finalize every unreachable object before the host exits
    pub collect_on_shutdown: bool,
}

fn default_domain() -> String {
    "bridge_d".to_string()
}

fn default_max_call_depth() -> usize {
    256
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            max_call_depth: default_max_call_depth(),
            collect_on_shutdown: true,
        }
    }
}

/// Settings for the host application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Assembly loaded and exercised at startup
    pub assembly: String,
    #[serde(alias = "plugins_dir")]
    pub native_plugins_dir: String,
    /// Exit with an error when a managed entry point faults
    pub abort_on_managed_fault: bool,
}

fn default_assembly() -> String {
    "BridgeTests".to_string()
}

fn default_native_plugins_dir() -> String {
    "plugins/native".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            assembly: default_assembly(),
            native_plugins_dir: default_native_plugins_dir(),
            abort_on_managed_fault: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub runtime: RuntimeConfig,
    pub host: HostConfig,
}

/// Reads the config at `path`, writing the defaults there first if it does not exist.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if path.exists() {
        info!("Loading config from {:?}", path);
        let file = fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let reader = std::io::BufReader::new(file);
        let config = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config)
    } else {
        info!("Config not found. Creating default at {:?}", path);
        let config = BridgeConfig::default();
        let file =
            fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &config).context("Failed to write default config")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{ "runtime": { "max_call_depth": 8 } }"#).unwrap();
        assert_eq!(config.runtime.max_call_depth, 8);
        assert_eq!(config.runtime.domain, "bridge_d");
        assert!(config.runtime.collect_on_shutdown);
        assert_eq!(config.host, HostConfig::default());
    }

    #[test]
    fn test_plugins_dir_alias() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{ "host": { "plugins_dir": "native" } }"#).unwrap();
        assert_eq!(config.host.native_plugins_dir, "native");
    }
}
