//! HTTP fetch for source videos that live outside the artifact store.

use crate::traits::{StorageError, StorageResult};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Clone)]
pub struct RemoteFetcher {
    client: reqwest::Client,
}

impl RemoteFetcher {
    pub fn new(timeout: Duration) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::ConfigError(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Stream `url` into `dest`. Non-2xx responses are download errors.
    /// Returns the number of bytes written.
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> StorageResult<u64> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StorageError::InvalidKey(format!(
                "unsupported source location: {}",
                url
            )));
        }

        let start = std::time::Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::DownloadFailed(format!(
                "GET {}: HTTP {}",
                url, status
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| StorageError::DownloadFailed(format!("GET {}: {}", url, e)))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(
            url = %url,
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Remote download successful"
        );

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_http_locations_are_rejected() {
        let fetcher = RemoteFetcher::new(Duration::from_secs(5)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = fetcher
            .fetch_to_file("ftp://example.com/a.mp4", &dir.path().join("input.mp4"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!dir.path().join("input.mp4").exists());
    }
}
