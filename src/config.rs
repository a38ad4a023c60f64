use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{wlog_debug, Error, Result};

/// User configuration, read from `~/.wavefront/wavefront.toml`.
///
/// Every field is optional in the file; CLI flags override what is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tasks in flight at once within a wave.
    pub max_concurrency: usize,
    /// Per-attempt task timeout.
    pub task_timeout_secs: u64,
    /// Per-gate checkpoint timeout.
    pub gate_timeout_secs: u64,
    pub fail_fast: bool,
    pub proceed_on_failed_dependency: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            task_timeout_secs: 600,
            gate_timeout_secs: 120,
            fail_fast: false,
            proceed_on_failed_dependency: false,
        }
    }
}

impl Config {
    pub fn wavefront_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".wavefront"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::wavefront_dir()?.join("wavefront.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        wlog_debug!("Config::load_from path={}", path.display());
        if !path.exists() {
            wlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        wlog_debug!(
            "Config loaded: max_concurrency={}, task_timeout_secs={}, gate_timeout_secs={}, fail_fast={}",
            config.max_concurrency,
            config.task_timeout_secs,
            config.gate_timeout_secs,
            config.fail_fast
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                wlog_debug!("Creating config directory {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        wlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Validation("max_concurrency must be at least 1".to_string()));
        }
        if self.task_timeout_secs == 0 || self.gate_timeout_secs == 0 {
            return Err(Error::Validation("timeouts must be at least one second".to_string()));
        }
        Ok(())
    }
}
