//! Resource fetchers resolving URLs referenced by rendered documents.
//!
//! A fetcher resolves a URL to a resource or to "not found". Absence is a
//! normal outcome (`Ok(None)`); `Err` is reserved for faults a fetcher wants
//! the bridge to report. The bundled fetchers never fault: they log their
//! failures and answer `Ok(None)`.

mod chain;
mod local;
mod network;

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

pub use chain::{ChainFetcher, NoneFetcher, combined_image_fetcher, combined_stylesheet_fetcher};
pub use local::{LocalFileFetcher, file_url_to_path};
pub use network::{
    DEFAULT_USER_AGENT, HttpClient, NetworkFetcher, configure_http_client, shared_http_client,
};

/// Kind of resource a document references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Image,
    Stylesheet,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Stylesheet => "stylesheet",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single resource lookup requested by the rendering engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub kind: ResourceKind,
}

impl FetchRequest {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ResourceKind::Image,
        }
    }

    pub fn stylesheet(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ResourceKind::Stylesheet,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("fetch failed: {0}")]
    Failed(String),
}

impl FetchError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Payload types a fetcher can produce. Raw bytes are decoded per kind:
/// images stay binary, stylesheets are UTF-8 text.
pub trait Resource: Sized + Send + 'static {
    const KIND: ResourceKind;

    fn decode(bytes: Bytes) -> Result<Self, String>;
}

impl Resource for Bytes {
    const KIND: ResourceKind = ResourceKind::Image;

    fn decode(bytes: Bytes) -> Result<Self, String> {
        Ok(bytes)
    }
}

impl Resource for String {
    const KIND: ResourceKind = ResourceKind::Stylesheet;

    fn decode(bytes: Bytes) -> Result<Self, String> {
        String::from_utf8(bytes.to_vec()).map_err(|err| err.to_string())
    }
}

pub type FetchOutcome<R> = Result<Option<R>, FetchError>;

/// Asynchronous resolution of a URL to a resource of type `R`.
#[async_trait]
pub trait Fetcher<R: Resource>: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome<R>;
}

pub type ImageFetcher = Arc<dyn Fetcher<Bytes>>;
pub type StylesheetFetcher = Arc<dyn Fetcher<String>>;

/// Adapter turning an async closure into a [`Fetcher`].
pub struct FnFetcher<R> {
    inner: Box<dyn Fn(String) -> BoxFuture<'static, FetchOutcome<R>> + Send + Sync>,
}

impl<R: Resource> FnFetcher<R> {
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchOutcome<R>> + Send + 'static,
    {
        Self {
            inner: Box::new(move |url| Box::pin(fetch(url))),
        }
    }
}

#[async_trait]
impl<R: Resource> Fetcher<R> for FnFetcher<R> {
    async fn fetch(&self, url: &str) -> FetchOutcome<R> {
        (self.inner)(url.to_owned()).await
    }
}

/// The pair of fetchers a render job resolves its references through.
#[derive(Clone)]
pub struct FetcherSet {
    pub images: ImageFetcher,
    pub stylesheets: StylesheetFetcher,
}

impl FetcherSet {
    pub fn new(images: ImageFetcher, stylesheets: StylesheetFetcher) -> Self {
        Self {
            images,
            stylesheets,
        }
    }

    /// Fetchers that never resolve anything.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoneFetcher), Arc::new(NoneFetcher))
    }
}

impl Default for FetcherSet {
    fn default() -> Self {
        Self::new(combined_image_fetcher(), combined_stylesheet_fetcher())
    }
}

impl fmt::Debug for FetcherSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherSet").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stylesheet_decoding_rejects_invalid_utf8() {
        let invalid = Bytes::from_static(&[0xff, 0xfe, 0x00]);
        assert!(<String as Resource>::decode(invalid).is_err());
        let valid = Bytes::from_static(b"body { color: red }");
        assert_eq!(
            <String as Resource>::decode(valid).expect("utf-8"),
            "body { color: red }"
        );
    }

    #[tokio::test]
    async fn closure_fetchers_receive_the_url() {
        let fetcher = FnFetcher::new(|url: String| async move {
            Ok::<_, FetchError>(Some(Bytes::from(url.into_bytes())))
        });
        let bytes = fetcher
            .fetch("https://example.test/a.png")
            .await
            .expect("no fault")
            .expect("found");
        assert_eq!(&bytes[..], b"https://example.test/a.png");
    }

    #[tokio::test]
    async fn closure_fetchers_propagate_io_and_http_faults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.css");
        let from_disk = FnFetcher::new(move |_url: String| {
            let path = missing.clone();
            async move {
                let bytes = tokio::fs::read(&path).await?;
                Ok::<_, FetchError>(Some(Bytes::from(bytes)))
            }
        });
        assert!(matches!(
            from_disk.fetch("file:///missing.css").await,
            Err(FetchError::Io(_))
        ));

        let over_http = FnFetcher::new(|url: String| async move {
            let response = reqwest::Client::new().get(url).send().await?;
            Ok::<_, FetchError>(Some(response.bytes().await?))
        });
        assert!(matches!(
            over_http.fetch("not a url").await,
            Err(FetchError::Http(_))
        ));
    }
}
