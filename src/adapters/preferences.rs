use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::DomainError;
use crate::ports::PreferenceStore;

/// Preferences kept in a flat JSON object on disk.
///
/// Values are cached in memory; every write rewrites the file through a
/// temp file and rename so a crash never leaves a truncated file.
pub struct JsonPreferenceStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonPreferenceStore {
    /// Open the store at `path`. A missing file means no preferences yet;
    /// an unreadable one is logged and ignored.
    pub fn open(path: PathBuf) -> Self {
        let values = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Ignoring unreadable preferences file");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        info!(path = ?path, entries = values.len(), "Preferences loaded");

        Self {
            path,
            values: RwLock::new(values),
        }
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), DomainError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_string_pretty(values)?)?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| DomainError::Preferences(format!("Failed to save preferences: {}", e)))?;

        debug!(path = ?self.path, "Preferences saved");
        Ok(())
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), DomainError> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<(), DomainError> {
        let mut values = self.values.write();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

/// In-memory preferences for hosts that persist settings themselves.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), DomainError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DomainError> {
        self.values.write().remove(key);
        Ok(())
    }
}
