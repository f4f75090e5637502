use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl ScenarioResult {
    pub fn passed(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn failed(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Outcome of one fixture run, written with `--report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureReport {
    pub domain: String,
    pub assembly: String,
    pub scenarios: Vec<ScenarioResult>,
    /// Objects finalized by the shutdown collection
    #[serde(default)]
    pub collected: usize,
    /// Native-side journal of the run
    #[serde(default)]
    pub journal: Vec<String>,
}

impl FixtureReport {
    pub fn new(domain: &str, assembly: &str, scenarios: Vec<ScenarioResult>) -> Self {
        Self {
            domain: domain.to_string(),
            assembly: assembly.to_string(),
            scenarios,
            collected: 0,
            journal: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(|s| s.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.scenarios.iter().filter(|s| !s.passed)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)
            .with_context(|| format!("Failed to create report {:?}", path))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        info!("Report written to {:?}", path);
        Ok(())
    }
}
