//! Project settings (`.terraflow/settings.yaml`)

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = "settings.yaml";
pub const PROJECT_DIR: &str = ".terraflow";

pub const ENV_PARALLELISM: &str = "TERRAFLOW_PARALLELISM";
pub const ENV_RUN_TIMEOUT: &str = "TERRAFLOW_RUN_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Maximum number of adapter calls in flight
    pub parallelism: usize,

    /// Read recorded resources before planning
    pub refresh: bool,

    /// State file, relative to the project root unless absolute
    pub state_path: PathBuf,

    /// Stop starting new nodes after this many seconds
    pub run_timeout_secs: Option<u64>,

    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: 10,
            refresh: true,
            state_path: PathBuf::from(PROJECT_DIR).join("state.json"),
            run_timeout_secs: None,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_elapsed_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_elapsed_secs: 300,
        }
    }
}

impl Settings {
    /// Load `<project_root>/.terraflow/settings.yaml` and apply env overrides
    ///
    /// A missing settings file yields the defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(PROJECT_DIR).join(SETTINGS_FILE);
        let mut settings = if path.exists() {
            Self::from_yaml(&std::fs::read_to_string(&path)?)?
        } else {
            Self::default()
        };
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Override values from `TERRAFLOW_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_number::<usize>(ENV_PARALLELISM)? {
            self.parallelism = value;
        }
        if let Some(value) = env_number::<u64>(ENV_RUN_TIMEOUT)? {
            self.run_timeout_secs = Some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(invalid("parallelism", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be 1.0 or greater"));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(invalid(
                "retry.max_delay_ms",
                "must not be smaller than retry.initial_delay_ms",
            ));
        }
        Ok(())
    }

    /// Absolute location of the state file
    pub fn state_file(&self, project_root: &Path) -> PathBuf {
        if self.state_path.is_absolute() {
            self.state_path.clone()
        } else {
            project_root.join(&self.state_path)
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &format!("'{}' is not a valid number", raw))),
        Err(_) => Ok(None),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        message: message.to_string(),
    }
}
