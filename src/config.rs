use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::log::LogLevel;
use crate::orchestration::FailurePolicy;
use crate::{clog_debug, Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    pub task_timeout_secs: Option<u64>,
    #[serde(default)]
    pub debug: bool,
    pub log_level: Option<LogLevel>,
}

impl Config {
    pub fn crew_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".crew"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::crew_dir()?.join("crew.toml"))
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        clog_debug!(
            "Config loaded: failure_policy={}, task_timeout_secs={:?}, debug={}",
            config.failure_policy,
            config.task_timeout_secs,
            config.debug
        );
        Ok(config)
    }

    /// Reject settings no run could use. Call again after applying
    /// command-line overrides.
    pub fn validate(&self) -> Result<()> {
        if self.task_timeout_secs == Some(0) {
            return Err(Error::Validation(
                "task_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let crew_dir = Self::crew_dir()?;
        if !crew_dir.exists() {
            clog_debug!("Creating crew directory");
            fs::create_dir_all(&crew_dir)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
