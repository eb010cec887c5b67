use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::analytics::AnalyticsConfig;
use crate::audit::AuditConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::cleaning::CleaningConfig;

pub const DEFAULT_CONFIG_PATH: &str = "census.toml";
pub const DB_PATH_ENV: &str = "CENSUS_DB_PATH";
pub const LOG_DIR_ENV: &str = "CENSUS_LOG_DIR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub cleaning: CleaningConfig,
    pub audit: AuditConfig,
    pub analytics: AnalyticsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("census.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_name: "census_layers.log".to_string(),
        }
    }
}

impl Config {
    /// Loads the TOML file at `path`. A missing file yields the defaults;
    /// a present but invalid file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                PipelineError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Self::from_toml_str(&content)?
        } else {
            debug!("Config file {} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `CENSUS_DB_PATH` / `CENSUS_LOG_DIR` as resolved by `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db_path) = lookup(DB_PATH_ENV) {
            debug!("{} overrides store.db_path", DB_PATH_ENV);
            self.store.db_path = PathBuf::from(db_path);
        }
        if let Some(log_dir) = lookup(LOG_DIR_ENV) {
            debug!("{} overrides logging.dir", LOG_DIR_ENV);
            self.logging.dir = PathBuf::from(log_dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ratios = std::iter::once(self.audit.max_null_ratio)
            .chain(self.audit.column_max_null_ratio.values().copied());
        for ratio in ratios {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(PipelineError::Config(format!(
                    "null ratio threshold {ratio} is outside [0, 1]"
                )));
            }
        }
        let labels = &self.analytics.gender_labels;
        if labels.male.trim().is_empty() || labels.female.trim().is_empty() {
            return Err(PipelineError::Config(
                "gender labels must not be empty".to_string(),
            ));
        }
        if labels.male == labels.female {
            return Err(PipelineError::Config(
                "male and female labels must differ".to_string(),
            ));
        }
        Ok(())
    }
}
