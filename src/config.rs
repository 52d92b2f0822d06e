//! Runtime configuration for edgeview

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::error::{EdgeError, EdgeResult};
use crate::native::{ComputeTarget, ModelOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub thread_name: String,
    /// Worker stack size in bytes; `None` keeps the platform default
    pub stack_size: Option<usize>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            thread_name: "edgeview-predictor".to_string(),
            stack_size: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteropConfig {
    /// Copy every array input, even borrowed and native buffers
    pub force_copy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub compute_target: ComputeTarget,
}

impl ModelConfig {
    pub fn options(&self) -> ModelOptions {
        ModelOptions {
            compute_target: self.compute_target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` level filter: error, warn, info, debug or trace
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub predictor: PredictorConfig,
    pub interop: InteropConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

impl EdgeConfig {
    /// Check values serde cannot
    pub fn validate(&self) -> EdgeResult<()> {
        if self.predictor.thread_name.is_empty() {
            return Err(EdgeError::ConfigurationError(
                "predictor.thread_name must not be empty".to_string(),
            ));
        }
        if self.predictor.stack_size == Some(0) {
            return Err(EdgeError::ConfigurationError(
                "predictor.stack_size must be positive".to_string(),
            ));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(EdgeError::ConfigurationError(format!(
                "unknown logging level {:?}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

/// Configuration manager with change notification
pub struct ConfigManager {
    config: Arc<RwLock<EdgeConfig>>,
    config_file: Option<PathBuf>,
    watchers: Vec<tokio::sync::watch::Sender<EdgeConfig>>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(EdgeConfig::default())),
            config_file: None,
            watchers: Vec::new(),
        }
    }

    /// Persist every update to `path`
    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn load_from_file(&mut self, path: &Path) -> EdgeResult<()> {
        let content = std::fs::read_to_string(path)?;
        let config: EdgeConfig = serde_json::from_str(&content)?;
        config.validate()?;

        *self.config.write() = config;
        self.config_file = Some(path.to_path_buf());

        tracing::info!("Configuration loaded from {:?}", path);
        self.notify_watchers();
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> EdgeResult<()> {
        let content = serde_json::to_string_pretty(&*self.config.read())?;
        std::fs::write(path, content)?;
        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn get_config(&self) -> EdgeConfig {
        self.config.read().clone()
    }

    /// Apply `f` to a copy of the configuration; the copy replaces the current
    /// one only if it validates
    pub fn update_config<F>(&mut self, f: F) -> EdgeResult<()>
    where
        F: FnOnce(&mut EdgeConfig),
    {
        let mut updated = self.get_config();
        f(&mut updated);
        updated.validate()?;
        *self.config.write() = updated;

        self.notify_watchers();
        if let Some(path) = &self.config_file {
            self.save_to_file(path)?;
        }
        Ok(())
    }

    pub fn set_config(&mut self, config: EdgeConfig) -> EdgeResult<()> {
        self.update_config(|current| *current = config)
    }

    pub fn watch_config(&mut self) -> tokio::sync::watch::Receiver<EdgeConfig> {
        let (sender, receiver) = tokio::sync::watch::channel(self.get_config());
        self.watchers.push(sender);
        receiver
    }

    fn notify_watchers(&mut self) {
        let config = self.get_config();
        self.watchers.retain(|sender| sender.send(config.clone()).is_ok());
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref CONFIG_MANAGER: RwLock<ConfigManager> = RwLock::new(ConfigManager::new());
}

/// Get the global configuration
pub fn get_config() -> EdgeConfig {
    CONFIG_MANAGER.read().get_config()
}

/// Update the global configuration
pub fn update_config<F>(f: F) -> EdgeResult<()>
where
    F: FnOnce(&mut EdgeConfig),
{
    CONFIG_MANAGER.write().update_config(f)
}

/// Load the global configuration from a JSON file
pub fn load_config_from_file(path: &Path) -> EdgeResult<()> {
    CONFIG_MANAGER.write().load_from_file(path)
}

/// Watch for global configuration changes
pub fn watch_config() -> tokio::sync::watch::Receiver<EdgeConfig> {
    CONFIG_MANAGER.write().watch_config()
}

/// Fluent construction of an [`EdgeConfig`]
pub struct ConfigBuilder {
    config: EdgeConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EdgeConfig::default(),
        }
    }

    pub fn predictor(mut self, f: impl FnOnce(&mut PredictorConfig)) -> Self {
        f(&mut self.config.predictor);
        self
    }

    pub fn interop(mut self, f: impl FnOnce(&mut InteropConfig)) -> Self {
        f(&mut self.config.interop);
        self
    }

    pub fn model(mut self, f: impl FnOnce(&mut ModelConfig)) -> Self {
        f(&mut self.config.model);
        self
    }

    pub fn logging(mut self, f: impl FnOnce(&mut LoggingConfig)) -> Self {
        f(&mut self.config.logging);
        self
    }

    pub fn build(self) -> EdgeResult<EdgeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Install as the global configuration
    pub fn apply(self) -> EdgeResult<()> {
        let config = self.build()?;
        update_config(|current| *current = config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .predictor(|p| {
                p.thread_name = "vision-worker".to_string();
                p.stack_size = Some(4 * 1024 * 1024);
            })
            .interop(|i| i.force_copy = true)
            .model(|m| m.compute_target = ComputeTarget::CpuOnly)
            .build()
            .unwrap();

        assert_eq!(config.predictor.thread_name, "vision-worker");
        assert_eq!(config.predictor.stack_size, Some(4 * 1024 * 1024));
        assert!(config.interop.force_copy);
        assert_eq!(config.model.options().compute_target, ComputeTarget::CpuOnly);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = ConfigBuilder::new().logging(|l| l.level = "loud".to_string()).build();
        assert!(matches!(err, Err(EdgeError::ConfigurationError(_))));

        let mut manager = ConfigManager::new();
        assert!(manager.update_config(|c| c.predictor.thread_name.clear()).is_err());
        assert_eq!(manager.get_config().predictor.thread_name, "edgeview-predictor");
    }

    #[test]
    fn test_config_manager_notifies_watchers() {
        let mut manager = ConfigManager::new();
        let receiver = manager.watch_config();
        assert!(!receiver.borrow().interop.force_copy);

        manager.update_config(|c| c.interop.force_copy = true).unwrap();
        assert!(receiver.borrow().interop.force_copy);
        assert!(manager.get_config().interop.force_copy);
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("edgeview.json");

        let mut manager = ConfigManager::new().with_config_file(config_path.clone());
        manager.update_config(|c| c.logging.level = "debug".to_string()).unwrap();

        let mut loaded = ConfigManager::new();
        loaded.load_from_file(&config_path).unwrap();
        assert_eq!(loaded.get_config().logging.level, "debug");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("partial.json");
        std::fs::write(&config_path, r#"{ "interop": { "force_copy": true } }"#).unwrap();

        let mut manager = ConfigManager::new();
        manager.load_from_file(&config_path).unwrap();
        let config = manager.get_config();
        assert!(config.interop.force_copy);
        assert_eq!(config.predictor.thread_name, "edgeview-predictor");

        std::fs::write(&config_path, "not json").unwrap();
        assert!(matches!(manager.load_from_file(&config_path), Err(EdgeError::SerializationError(_))));
    }
}
