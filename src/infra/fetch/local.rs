use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::warn;
use url::Url;

use super::{FetchOutcome, Fetcher, Resource};

const FILE_SCHEME_PREFIX: &str = "file://";

/// Resolves `file://` URLs from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileFetcher;

/// Convert a `file://` URL into a filesystem path. Percent-encoded URLs are
/// decoded; anything the URL parser rejects falls back to the raw suffix.
pub fn file_url_to_path(url: &str) -> Option<PathBuf> {
    let raw = url.strip_prefix(FILE_SCHEME_PREFIX)?;
    match Url::parse(url).ok().and_then(|parsed| parsed.to_file_path().ok()) {
        Some(path) => Some(path),
        None => Some(PathBuf::from(raw)),
    }
}

#[async_trait]
impl<R: Resource> Fetcher<R> for LocalFileFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome<R> {
        let Some(path) = file_url_to_path(url) else {
            return Ok(None);
        };

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(None),
        }

        let bytes = match fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(
                    target = "infra::fetch::local",
                    op = "local::fetch",
                    result = "read_error",
                    kind = %R::KIND,
                    path = %path.display(),
                    error = %err,
                    "Failed to read local file"
                );
                return Ok(None);
            }
        };

        match R::decode(bytes) {
            Ok(resource) => Ok(Some(resource)),
            Err(err) => {
                warn!(
                    target = "infra::fetch::local",
                    op = "local::fetch",
                    result = "decode_error",
                    kind = %R::KIND,
                    path = %path.display(),
                    error = %err,
                    "Failed to decode local file"
                );
                Ok(None)
            }
        }
    }
}
