use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::normalize::{DateNormalizer, LayerClassifier};
use crate::sources::AdapterSettings;
use crate::types::Layer;

pub const DEFAULT_CONFIG_PATH: &str = "lifeline.toml";
pub const CONFIG_PATH_ENV: &str = "LIFELINE_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dates: DateConfig,
    pub classifier: ClassifierConfig,
    pub store: StoreConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DateConfig {
    /// Read "03/04/2020" as March 4th.
    pub month_first: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub min_score: usize,
    pub default_layer: Layer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Owner id attached to committed events.
    pub owner_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for DateConfig {
    fn default() -> Self {
        Self { month_first: true }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_score: 1,
            default_layer: Layer::Media,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            owner_id: "local".to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl Config {
    /// Load from `$LIFELINE_CONFIG`, else `lifeline.toml`. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let config_content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.classifier.min_score == 0 {
            return Err(PipelineError::Config(
                "classifier.min_score must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            dates: DateNormalizer::new(self.dates.month_first),
            classifier: LayerClassifier::new(
                self.classifier.min_score,
                self.classifier.default_layer,
            ),
        }
    }
}
