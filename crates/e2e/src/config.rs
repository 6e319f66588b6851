//! Harness configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base URL of the pet clinic (form channel)
    pub pet_clinic_url: String,

    /// Base URL of the book store (REST channel)
    pub book_store_url: String,

    /// Per-request timeout
    pub request_timeout_ms: u64,

    /// Consistency window defaults
    pub consistency: ConsistencySettings,

    /// Directory of YAML scenarios
    pub scenarios_dir: PathBuf,

    /// Scenarios allowed in flight at once
    pub max_concurrency: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            pet_clinic_url: "http://localhost:8080/petclinic/".to_string(),
            book_store_url: "http://localhost:5000/".to_string(),
            request_timeout_ms: 10_000,
            consistency: ConsistencySettings::default(),
            scenarios_dir: PathBuf::from("scenarios"),
            max_concurrency: 4,
        }
    }
}

/// Polling budget for cross-channel checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencySettings {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ConsistencySettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            poll_interval_ms: 250,
        }
    }
}

impl ConsistencySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// These settings with per-scenario overrides applied
    pub fn overridden(&self, timeout_ms: Option<u64>, poll_interval_ms: Option<u64>) -> Self {
        Self {
            timeout_ms: timeout_ms.unwrap_or(self.timeout_ms),
            poll_interval_ms: poll_interval_ms.unwrap_or(self.poll_interval_ms),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file; a missing file means defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject settings the runner cannot work with
    pub fn validate(&self) -> E2eResult<()> {
        for (name, value) in [
            ("pet_clinic_url", &self.pet_clinic_url),
            ("book_store_url", &self.book_store_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| E2eError::Config(format!("{} '{}': {}", name, value, e)))?;
        }
        if self.max_concurrency == 0 {
            return Err(E2eError::Config("max_concurrency must be at least 1".to_string()));
        }
        if self.consistency.poll_interval_ms == 0 {
            return Err(E2eError::Config(
                "consistency.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
