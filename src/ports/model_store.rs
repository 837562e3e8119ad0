use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{DomainError, DownloadProgress, InstallManifest, ModelTier};

/// Callback receiving download progress.
pub type ProgressCallback = Box<dyn Fn(DownloadProgress) + Send + Sync>;

/// Port for on-disk model storage.
///
/// Implementations handle the directory layout, downloads, verification,
/// and deletion. Each tier owns one directory under [`models_dir`](Self::models_dir).
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Root directory holding every tier's directory.
    fn models_dir(&self) -> PathBuf;

    /// Directory owned by `tier`.
    fn model_dir(&self, tier: ModelTier) -> PathBuf;

    /// Path of the model file for `tier` (whether or not it exists).
    fn model_path(&self, tier: ModelTier) -> PathBuf;

    /// Check if the model file for `tier` is present.
    fn is_downloaded(&self, tier: ModelTier) -> bool;

    /// Tiers currently present on disk, smallest first.
    fn downloaded_tiers(&self) -> Vec<ModelTier> {
        ModelTier::ALL
            .into_iter()
            .filter(|t| self.is_downloaded(*t))
            .collect()
    }

    /// Fail fast with `StorageUnwritable` if models cannot be written.
    fn ensure_writable(&self) -> Result<(), DomainError>;

    /// Download and install the model for `tier`.
    ///
    /// Partial data is removed when the download fails or `cancel` fires.
    async fn download(
        &self,
        tier: ModelTier,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<InstallManifest, DomainError>;

    /// Check the installed file against its install manifest.
    ///
    /// Fails with `ModelVerification` when the digests differ.
    fn verify(&self, tier: ModelTier) -> Result<(), DomainError>;

    /// Remove everything stored for `tier`.
    ///
    /// Returns false if nothing was stored.
    fn delete(&self, tier: ModelTier) -> Result<bool, DomainError>;
}
