use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use reqwest::Client;
use tracing::{error, warn};

use super::{FetchOutcome, Fetcher, Resource};

pub type HttpClient = Client;

pub const DEFAULT_USER_AGENT: &str = concat!("htmlkit/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

static HTTP_CLIENT: OnceCell<Option<HttpClient>> = OnceCell::new();

/// Build the process-wide HTTP client with the given user agent. Returns
/// `false` when a client was already built.
pub fn configure_http_client(user_agent: &str) -> bool {
    HTTP_CLIENT.set(build_client(user_agent)).is_ok()
}

/// Shared outbound HTTP capability, or `None` when no client could be built.
pub fn shared_http_client() -> Option<HttpClient> {
    HTTP_CLIENT
        .get_or_init(|| build_client(DEFAULT_USER_AGENT))
        .clone()
}

fn build_client(user_agent: &str) -> Option<HttpClient> {
    match Client::builder()
        .user_agent(user_agent)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
    {
        Ok(client) => Some(client),
        Err(err) => {
            error!(
                target = "infra::fetch::network",
                op = "network::build_client",
                error = %err,
                "Failed to build HTTP client; network fetching disabled"
            );
            None
        }
    }
}

/// Resolves URLs with an HTTP GET.
#[derive(Debug, Clone)]
pub struct NetworkFetcher {
    client: Option<HttpClient>,
}

impl NetworkFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// Fetcher backed by the shared client.
    pub fn shared() -> Self {
        Self {
            client: shared_http_client(),
        }
    }

    /// Fetcher without HTTP capability; every lookup is "not found".
    pub fn unavailable() -> Self {
        Self { client: None }
    }
}

#[async_trait]
impl<R: Resource> Fetcher<R> for NetworkFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome<R> {
        let Some(client) = self.client.as_ref() else {
            error!(
                target = "infra::fetch::network",
                op = "network::fetch",
                result = "unavailable",
                kind = %R::KIND,
                url,
                "No HTTP client available; cannot fetch remote resource"
            );
            return Ok(None);
        };

        let started_at = Instant::now();
        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    target = "infra::fetch::network",
                    op = "network::fetch",
                    result = "transport_error",
                    kind = %R::KIND,
                    url,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Failed to fetch remote resource"
                );
                return Ok(None);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(
                target = "infra::fetch::network",
                op = "network::fetch",
                result = "status",
                kind = %R::KIND,
                url,
                status = status.as_u16(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Remote resource responded with a non-success status"
            );
            return Ok(None);
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    target = "infra::fetch::network",
                    op = "network::fetch",
                    result = "body_error",
                    kind = %R::KIND,
                    url,
                    error = %err,
                    "Failed to read remote resource body"
                );
                return Ok(None);
            }
        };

        match R::decode(body) {
            Ok(resource) => Ok(Some(resource)),
            Err(err) => {
                warn!(
                    target = "infra::fetch::network",
                    op = "network::fetch",
                    result = "decode_error",
                    kind = %R::KIND,
                    url,
                    error = %err,
                    "Failed to decode remote resource"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn missing_client_is_not_found() {
        let fetcher = NetworkFetcher::unavailable();
        let image = Fetcher::<Bytes>::fetch(&fetcher, "https://example.test/a.png")
            .await
            .expect("no fault");
        assert!(image.is_none());
    }

    #[tokio::test]
    async fn unreachable_hosts_are_not_found() {
        let fetcher = NetworkFetcher::new(Client::new());
        let css = Fetcher::<String>::fetch(&fetcher, "http://127.0.0.1:9/missing.css")
            .await
            .expect("no fault");
        assert!(css.is_none());
    }
}
