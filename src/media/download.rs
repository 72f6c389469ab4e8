//! Source retrieval into the job workspace.

use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::info;
use url::Url;

use crate::error::StorageError;

/// Copies the resource at `locator` to `dest`. Supports `file`, `http` and
/// `https` locators. Returns the number of bytes written.
pub async fn fetch_source(
    client: &reqwest::Client,
    locator: &str,
    dest: &Path,
) -> Result<u64, StorageError> {
    let url = Url::parse(locator).map_err(|e| StorageError::DownloadFailed {
        url: locator.to_string(),
        message: e.to_string(),
    })?;

    let bytes = match url.scheme() {
        "file" => copy_local(&url, dest).await?,
        "http" | "https" => download(client, &url, dest).await?,
        other => return Err(StorageError::UnsupportedScheme(other.to_string())),
    };

    info!(source = %url, dest = ?dest, bytes, "Fetched source");
    Ok(bytes)
}

async fn copy_local(url: &Url, dest: &Path) -> Result<u64, StorageError> {
    let path = url.to_file_path().map_err(|_| StorageError::DownloadFailed {
        url: url.to_string(),
        message: "not a local path".to_string(),
    })?;

    tokio::fs::copy(&path, dest)
        .await
        .map_err(|e| StorageError::Io { path, source: e })
}

async fn download(client: &reqwest::Client, url: &Url, dest: &Path) -> Result<u64, StorageError> {
    let failed = |message: String| StorageError::DownloadFailed {
        url: url.to_string(),
        message,
    };

    let mut response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| failed(e.to_string()))?;

    let io_err = |e: std::io::Error| StorageError::Io {
        path: dest.to_path_buf(),
        source: e,
    };
    let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;

    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;

    Ok(written)
}
