use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::config::DownloadConfig;
use crate::domain::DomainError;
use crate::ports::{ByteProgressCallback, HttpClient};

/// HTTP client that only talks to whitelisted hosts.
///
/// Every model download goes through here; requests to any other host are
/// refused before a connection is opened.
pub struct GuardedHttpClient {
    client: Client,
    allowed_domains: RwLock<Vec<String>>,
    timeout: Duration,
}

impl GuardedHttpClient {
    /// Create a client from the download settings.
    pub fn new(config: &DownloadConfig) -> Result<Self, DomainError> {
        let client = Client::builder()
            .use_rustls_tls()
            .user_agent(format!("Murmur/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DomainError::HttpRequest(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            allowed_domains = ?config.allowed_domains,
            timeout_secs = config.timeout_secs,
            "GuardedHttpClient initialized"
        );

        Ok(Self {
            client,
            allowed_domains: RwLock::new(config.allowed_domains.clone()),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Update allowed domains.
    pub fn set_allowed_domains(&self, domains: Vec<String>) {
        let mut guard = self.allowed_domains.write();
        *guard = domains;
        info!(allowed_domains = ?*guard, "Allowed download domains updated");
    }

    /// Check if a URL is allowed based on current settings.
    fn is_url_allowed(&self, url: &str) -> Result<(), DomainError> {
        let parsed = Url::parse(url).map_err(|e| DomainError::HttpRequest(e.to_string()))?;
        if parsed.scheme() != "https" {
            warn!(url = url, "Network request blocked: not https");
            return Err(DomainError::NetworkBlocked {
                reason: format!("Scheme '{}' is not allowed", parsed.scheme()),
            });
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| DomainError::HttpRequest("Invalid URL: no host".to_string()))?;

        let allowed = self.allowed_domains.read();
        if !allowed.iter().any(|d| host == d || host.ends_with(&format!(".{}", d))) {
            warn!(url = url, host = host, "Network request blocked: domain not in whitelist");
            return Err(DomainError::NetworkBlocked {
                reason: format!("Domain '{}' is not in the allowed list", host),
            });
        }

        debug!(url = url, "Network request allowed");
        Ok(())
    }

    fn cancelled() -> DomainError {
        DomainError::HttpRequest("Download cancelled".to_string())
    }

    /// Stream the body into `temp_path`.
    async fn write_body(
        response: Response,
        temp_path: &Path,
        total_size: u64,
        progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
        cancel: &CancellationToken,
    ) -> Result<u64, DomainError> {
        let mut file = tokio::fs::File::create(temp_path).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Self::cancelled()),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| DomainError::HttpRequest(e.to_string()))?;

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(callback) = progress {
                callback(downloaded, total_size);
            }
        }

        file.flush().await?;
        Ok(downloaded)
    }
}

#[async_trait]
impl HttpClient for GuardedHttpClient {
    async fn download_file(
        &self,
        url: &str,
        path: &Path,
        progress_callback: Option<ByteProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<u64, DomainError> {
        self.is_url_allowed(url)?;

        let request = self.client.get(url).timeout(self.timeout).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Self::cancelled()),
            response = request => response.map_err(|e| DomainError::HttpRequest(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::HttpRequest(format!(
                "HTTP {} for {}",
                status, url
            )));
        }

        let total_size = response.content_length().unwrap_or(0);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to temp file first, then rename atomically
        let temp_path = path.with_extension("download");

        let downloaded = match Self::write_body(
            response,
            &temp_path,
            total_size,
            progress_callback.as_deref(),
            &cancel,
        )
        .await
        {
            Ok(downloaded) => downloaded,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(DomainError::Io(e.to_string()));
        }

        info!(path = ?path, size = downloaded, "File downloaded successfully");
        Ok(downloaded)
    }

    fn allowed_domains(&self) -> Vec<String> {
        self.allowed_domains.read().clone()
    }
}
