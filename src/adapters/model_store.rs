use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{DomainError, DownloadProgress, InstallManifest, ModelTier};
use crate::ports::{ByteProgressCallback, HttpClient, ModelStore, ProgressCallback};

/// Name of the install record kept in every tier directory.
const MANIFEST_FILE: &str = "manifest.json";

/// Scratch file used to check that the models directory accepts writes.
const WRITE_PROBE_FILE: &str = ".write-probe";

/// Model store on the local filesystem.
///
/// Layout: `<models_dir>/<storage_identifier>/<file_name>` plus a
/// `manifest.json` written once the download has been hashed.
pub struct LocalModelStore {
    models_dir: PathBuf,
    base_url: String,
    http: Arc<dyn HttpClient>,
}

impl LocalModelStore {
    /// Create a store rooted at `models_dir`, downloading from `base_url`.
    ///
    /// Nothing is created on disk until the first write.
    pub fn new(models_dir: PathBuf, base_url: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        let base_url = base_url.into();
        info!(models_dir = ?models_dir, base_url = %base_url, "LocalModelStore initialized");

        Self {
            models_dir,
            base_url,
            http,
        }
    }

    fn manifest_path(&self, tier: ModelTier) -> PathBuf {
        self.model_dir(tier).join(MANIFEST_FILE)
    }

    fn read_manifest(&self, tier: ModelTier) -> Result<InstallManifest, DomainError> {
        let path = self.manifest_path(tier);
        if !path.is_file() {
            return Err(DomainError::ModelNotFound(format!(
                "{} has no install manifest",
                tier
            )));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn unwritable(path: &Path, err: impl std::fmt::Display) -> DomainError {
        DomainError::StorageUnwritable {
            path: path.to_string_lossy().to_string(),
            reason: err.to_string(),
        }
    }

    /// Remove the tier directory if the failed download left it empty.
    fn discard_partial(&self, tier: ModelTier) {
        let dir = self.model_dir(tier);
        if fs::remove_dir(&dir).is_ok() {
            debug!(tier = %tier, "Removed empty model directory");
        }
    }

    /// Calculate SHA-256 hash of a file.
    fn calculate_sha256(path: &Path) -> Result<String, DomainError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();

        let mut buffer = [0u8; 64 * 1024];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    async fn hash_in_background(path: PathBuf) -> Result<String, DomainError> {
        tokio::task::spawn_blocking(move || Self::calculate_sha256(&path))
            .await
            .map_err(|e| DomainError::Io(format!("Hashing task failed: {}", e)))?
    }
}

#[async_trait]
impl ModelStore for LocalModelStore {
    fn models_dir(&self) -> PathBuf {
        self.models_dir.clone()
    }

    fn model_dir(&self, tier: ModelTier) -> PathBuf {
        self.models_dir.join(tier.descriptor().storage_identifier)
    }

    fn model_path(&self, tier: ModelTier) -> PathBuf {
        self.model_dir(tier).join(tier.descriptor().file_name)
    }

    fn is_downloaded(&self, tier: ModelTier) -> bool {
        fs::metadata(self.model_path(tier))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    fn ensure_writable(&self) -> Result<(), DomainError> {
        fs::create_dir_all(&self.models_dir).map_err(|e| Self::unwritable(&self.models_dir, e))?;

        let probe = self.models_dir.join(WRITE_PROBE_FILE);
        fs::write(&probe, b"murmur").map_err(|e| Self::unwritable(&self.models_dir, e))?;
        let _ = fs::remove_file(&probe);

        Ok(())
    }

    async fn download(
        &self,
        tier: ModelTier,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<InstallManifest, DomainError> {
        let descriptor = tier.descriptor();
        let url = descriptor.download_url(&self.base_url);
        let dir = self.model_dir(tier);
        let target_path = self.model_path(tier);

        fs::create_dir_all(&dir).map_err(|e| Self::unwritable(&dir, e))?;

        info!(
            tier = %tier,
            url = %url,
            target = ?target_path,
            estimated_size = %tier.size_label(),
            "Starting model download"
        );

        let byte_progress: Option<ByteProgressCallback> = progress.map(|p| {
            let wrapper: ByteProgressCallback = Box::new(move |downloaded, total| {
                let mut dp = DownloadProgress::new(tier);
                dp.update(downloaded, total);
                p(dp);
            });
            wrapper
        });

        if let Err(e) = self
            .http
            .download_file(&url, &target_path, byte_progress, cancel.clone())
            .await
        {
            self.discard_partial(tier);
            if cancel.is_cancelled() {
                info!(tier = %tier, "Model download cancelled");
                return Err(DomainError::Cancelled { tier });
            }
            warn!(tier = %tier, error = %e, "Model download failed");
            return Err(DomainError::DownloadFailed(e.to_string()));
        }

        info!(target = ?target_path, "Download complete, hashing model file");
        let sha256 = match Self::hash_in_background(target_path.clone()).await {
            Ok(sha256) => sha256,
            Err(e) => {
                let _ = fs::remove_dir_all(&dir);
                return Err(DomainError::DownloadFailed(e.to_string()));
            }
        };

        if cancel.is_cancelled() {
            let _ = fs::remove_dir_all(&dir);
            return Err(DomainError::Cancelled { tier });
        }

        let manifest = InstallManifest {
            tier,
            file_name: descriptor.file_name.to_string(),
            size_bytes: fs::metadata(&target_path)?.len(),
            sha256,
        };
        fs::write(
            self.manifest_path(tier),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        info!(
            tier = %tier,
            size_mb = manifest.size_bytes / (1024 * 1024),
            "Model installed successfully"
        );

        Ok(manifest)
    }

    fn verify(&self, tier: ModelTier) -> Result<(), DomainError> {
        let manifest = self.read_manifest(tier)?;
        let path = self.model_path(tier);
        if !path.is_file() {
            return Err(DomainError::ModelNotFound(tier.to_string()));
        }

        let actual_sha256 = Self::calculate_sha256(&path)?;
        if actual_sha256 != manifest.sha256 {
            warn!(
                tier = %tier,
                expected = %manifest.sha256,
                actual = %actual_sha256,
                "Model verification failed"
            );
            return Err(DomainError::ModelVerification {
                expected: manifest.sha256,
                actual: actual_sha256,
            });
        }

        debug!(tier = %tier, "Model verified");
        Ok(())
    }

    fn delete(&self, tier: ModelTier) -> Result<bool, DomainError> {
        let dir = self.model_dir(tier);
        if !dir.exists() {
            debug!(tier = %tier, "Nothing stored for model");
            return Ok(false);
        }

        fs::remove_dir_all(&dir)?;
        info!(tier = %tier, "Model deleted");
        Ok(true)
    }
}
