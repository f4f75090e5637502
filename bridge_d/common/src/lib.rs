mod config;

pub use config::{load_config, BridgeConfig, HostConfig, RuntimeConfig};
