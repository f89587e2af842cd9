//! Configuration file support for medsched.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medsched/config.toml`.

use crate::candidates::CandidatePolicy;
use crate::format::{duration_str, format_duration, option_duration_str};
use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    #[serde(default)]
    pub advisory: AdvisoryConfig,
}

/// Where medication and rule definitions come from
///
/// Either path may be omitted; the built-in catalog fills the gap.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DataConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medications_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<PathBuf>,
}

/// Candidate generation and rule-based tunables
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulingConfig {
    #[serde(default = "default_step", with = "duration_str")]
    pub step: Duration,

    #[serde(
        default,
        with = "option_duration_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_delay: Option<Duration>,

    #[serde(default = "default_late_warning_after", with = "duration_str")]
    pub late_warning_after: Duration,

    #[serde(default = "default_max_adjustment", with = "duration_str")]
    pub max_adjustment: Duration,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            max_delay: None,
            late_warning_after: default_late_warning_after(),
            max_adjustment: default_max_adjustment(),
        }
    }
}

impl SchedulingConfig {
    pub fn candidate_policy(&self) -> CandidatePolicy {
        CandidatePolicy {
            step: self.step,
            max_delay: self.max_delay,
        }
    }
}

/// Advisory service connection settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdvisoryConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the credential; its presence enables the service
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout", with = "duration_str")]
    pub timeout: Duration,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout: default_timeout(),
        }
    }
}

impl AdvisoryConfig {
    /// Call timeout as a std duration
    pub fn call_timeout(&self) -> std::time::Duration {
        self.timeout
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(10))
    }

    /// Credential from the configured environment variable, if set and non-empty
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

// Default value functions
fn default_step() -> Duration {
    Duration::minutes(15)
}

fn default_late_warning_after() -> Duration {
    Duration::hours(2)
}

fn default_max_adjustment() -> Duration {
    Duration::hours(1)
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

fn default_model() -> String {
    "gemini-1.5-flash".into()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}

fn default_timeout() -> Duration {
    Duration::seconds(10)
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or_else(|| Error::Config("Cannot locate a configuration directory".into()))?;
        Ok(base.join("medsched").join("config.toml"))
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let scheduling = &self.scheduling;
        if scheduling.step <= Duration::zero() {
            return Err(Error::Config(format!(
                "scheduling.step must be positive, got {}",
                format_duration(scheduling.step)
            )));
        }
        if let Some(max_delay) = scheduling.max_delay {
            if max_delay <= Duration::zero() {
                return Err(Error::Config("scheduling.max_delay must be positive".into()));
            }
        }
        if scheduling.max_adjustment < Duration::zero()
            || scheduling.late_warning_after < Duration::zero()
        {
            return Err(Error::Config(
                "scheduling durations must not be negative".into(),
            ));
        }
        if self.advisory.timeout <= Duration::zero() {
            return Err(Error::Config("advisory.timeout must be positive".into()));
        }
        if self.advisory.endpoint.trim().is_empty() || self.advisory.model.trim().is_empty() {
            return Err(Error::Config(
                "advisory.endpoint and advisory.model must be set".into(),
            ));
        }
        Ok(())
    }
}
