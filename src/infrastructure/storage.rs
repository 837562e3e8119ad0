use std::path::Path;
use std::sync::Arc;

use tracing::trace;
use walkdir::WalkDir;

use crate::domain::ModelTier;
use crate::ports::ModelStore;

/// Total size of the regular files under `path`, recursively.
///
/// Entries that cannot be read are skipped. Symlinks are not followed.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                trace!(path = ?e.path(), error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Reports disk usage of installed models for diagnostics and settings screens.
pub struct StorageAccountant {
    store: Arc<dyn ModelStore>,
}

impl StorageAccountant {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }

    /// Bytes stored for `tier`.
    pub fn storage_size(&self, tier: ModelTier) -> u64 {
        directory_size(&self.store.model_dir(tier))
    }

    /// Bytes stored across all tiers.
    pub fn total_storage_used(&self) -> u64 {
        ModelTier::ALL.iter().map(|t| self.storage_size(*t)).sum()
    }

    /// Tiers with a model file present.
    pub fn downloaded_tiers(&self) -> Vec<ModelTier> {
        self.store.downloaded_tiers()
    }
}
