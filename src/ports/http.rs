use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::DomainError;

/// Callback receiving `(bytes_downloaded, total_bytes)`; total is 0 when unknown.
pub type ByteProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// HTTP client port for model downloads.
/// All network traffic must go through this interface.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Download a file to a specified path.
    ///
    /// The file only appears at `path` once the transfer completed; on error
    /// or cancellation nothing is left behind. Returns the number of bytes written.
    async fn download_file(
        &self,
        url: &str,
        path: &Path,
        progress_callback: Option<ByteProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<u64, DomainError>;

    /// Get the list of allowed domains.
    fn allowed_domains(&self) -> Vec<String>;
}
