use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::datastore::ScanConsistency;
use crate::error::{ExecError, ExecResult};

/// Items buffered between an operator and its consumer.
pub const DEFAULT_PIPELINE_CAP: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub pipeline_cap: usize,
    pub scan_consistency: ScanConsistency,
    /// Query deadline in milliseconds; absent means no deadline.
    pub timeout_ms: Option<u64>,
    pub log_filter: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            pipeline_cap: DEFAULT_PIPELINE_CAP,
            scan_consistency: ScanConsistency::NotBounded,
            timeout_ms: None,
            log_filter: "streamexec=info".to_string(),
        }
    }
}

impl ExecConfig {
    pub fn from_toml_str(s: &str) -> ExecResult<Self> {
        let config: ExecConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads an optional TOML file, then applies `STREAMEXEC_*` overrides
    /// from the environment (and `.env`).
    pub fn load(path: Option<&Path>) -> ExecResult<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    ExecError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                toml::from_str(&text)?
            }
            None => ExecConfig::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> ExecResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STREAMEXEC_PIPELINE_CAP") {
            self.pipeline_cap = v.parse().map_err(|_| {
                ExecError::Config(format!("STREAMEXEC_PIPELINE_CAP is not a number: {}", v))
            })?;
        }
        if let Some(v) = lookup("STREAMEXEC_TIMEOUT_MS") {
            self.timeout_ms = Some(v.parse().map_err(|_| {
                ExecError::Config(format!("STREAMEXEC_TIMEOUT_MS is not a number: {}", v))
            })?);
        }
        if let Some(v) = lookup("STREAMEXEC_CONSISTENCY") {
            self.scan_consistency = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ExecResult<()> {
        if self.pipeline_cap == 0 {
            return Err(ExecError::Config("pipeline_cap must be positive".to_string()));
        }
        if self.timeout_ms == Some(0) {
            return Err(ExecError::Config("timeout_ms must be positive when set".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
