use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Setting keys the pipeline looks up at operation time.
pub mod keys {
    pub const ORIGIN_DIRECTORY: &str = "origin_directory";
    pub const DESTINATION_ROOT: &str = "destination_root";
    pub const MODEL_PATH: &str = "model_path";
    pub const MODEL_NAME: &str = "model_name";
    pub const TRAINING_LOG_PATH: &str = "training_log_path";
    pub const TRAINING_LOG_NAME: &str = "training_log_name";
}

/// String key lookup for required settings.
///
/// A missing setting only fails the operation that asked for it.
pub trait ConfigProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn require(&self, key: &str) -> Result<String, PipelineError> {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PipelineError::MissingSetting(key.to_string()))
    }
}

impl ConfigProvider for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub catalog: CatalogPaths,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Locations the pipeline reads from and writes to. All optional at load
/// time; each operation requires the ones it uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogPaths {
    #[serde(default)]
    pub origin_directory: Option<String>,
    #[serde(default)]
    pub destination_root: Option<String>,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub training_log_path: Option<String>,
    #[serde(default)]
    pub training_log_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    100
}

impl ConfigProvider for AppConfig {
    fn get(&self, key: &str) -> Option<String> {
        let paths = &self.catalog;
        let value = match key {
            keys::ORIGIN_DIRECTORY => &paths.origin_directory,
            keys::DESTINATION_ROOT => &paths.destination_root,
            keys::MODEL_PATH => &paths.model_path,
            keys::MODEL_NAME => &paths.model_name,
            keys::TRAINING_LOG_PATH => &paths.training_log_path,
            keys::TRAINING_LOG_NAME => &paths.training_log_name,
            _ => return None,
        };
        value.clone()
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    // e.g. CATALOG__CATALOG__ORIGIN_DIRECTORY=/srv/inbox
    settings = settings.add_source(
        config::Environment::with_prefix("CATALOG")
            .prefix_separator("__")
            .separator("__"),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
