use std::path::PathBuf;

use crate::domain::{AppConfig, DomainError};

/// Persists the application configuration and knows where Murmur keeps its files.
pub trait ConfigStore: Send + Sync {
    /// Load configuration, writing the defaults on first run.
    fn load(&self) -> Result<AppConfig, DomainError>;

    /// Save configuration to persistent storage.
    fn save(&self, config: &AppConfig) -> Result<(), DomainError>;

    fn config_path(&self) -> PathBuf;

    /// Application data directory.
    fn data_dir(&self) -> PathBuf;

    fn logs_dir(&self) -> PathBuf;

    /// Default models directory when the config does not override it.
    fn models_dir(&self) -> PathBuf {
        self.data_dir().join("models")
    }

    /// File backing the user preference store.
    fn preferences_path(&self) -> PathBuf {
        self.data_dir().join("preferences.json")
    }
}
