use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    FetchOutcome, Fetcher, ImageFetcher, LocalFileFetcher, NetworkFetcher, Resource,
    StylesheetFetcher,
};

/// Tries each fetcher in order and stops at the first one that finds the
/// resource. A fault from any member stops the chain and is returned as is.
pub struct ChainFetcher<R> {
    fetchers: Vec<Arc<dyn Fetcher<R>>>,
}

impl<R: Resource> ChainFetcher<R> {
    pub fn new(fetchers: Vec<Arc<dyn Fetcher<R>>>) -> Self {
        Self { fetchers }
    }

    /// Local files first, then the network.
    pub fn local_then_network(network: NetworkFetcher) -> Self {
        Self::new(vec![Arc::new(LocalFileFetcher), Arc::new(network)])
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

#[async_trait]
impl<R: Resource> Fetcher<R> for ChainFetcher<R> {
    async fn fetch(&self, url: &str) -> FetchOutcome<R> {
        for fetcher in &self.fetchers {
            if let Some(resource) = fetcher.fetch(url).await? {
                return Ok(Some(resource));
            }
        }
        Ok(None)
    }
}

/// Fetcher that never resolves anything. Used to switch off loading of a
/// resource kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneFetcher;

#[async_trait]
impl<R: Resource> Fetcher<R> for NoneFetcher {
    async fn fetch(&self, _url: &str) -> FetchOutcome<R> {
        Ok(None)
    }
}

pub fn combined_image_fetcher() -> ImageFetcher {
    Arc::new(ChainFetcher::<Bytes>::local_then_network(
        NetworkFetcher::shared(),
    ))
}

pub fn combined_stylesheet_fetcher() -> StylesheetFetcher {
    Arc::new(ChainFetcher::<String>::local_then_network(
        NetworkFetcher::shared(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::infra::fetch::FetchError;

    struct Counting {
        calls: Arc<AtomicUsize>,
        answer: Option<&'static str>,
    }

    #[async_trait]
    impl Fetcher<String> for Counting {
        async fn fetch(&self, _url: &str) -> FetchOutcome<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.map(str::to_owned))
        }
    }

    struct Faulty;

    #[async_trait]
    impl Fetcher<String> for Faulty {
        async fn fetch(&self, _url: &str) -> FetchOutcome<String> {
            Err(FetchError::failed("boom"))
        }
    }

    #[tokio::test]
    async fn stops_at_first_hit() {
        let second_calls = Arc::new(AtomicUsize::new(0));
        let chain: ChainFetcher<String> = ChainFetcher::new(vec![
            Arc::new(Counting {
                calls: Arc::new(AtomicUsize::new(0)),
                answer: Some("first"),
            }),
            Arc::new(Counting {
                calls: Arc::clone(&second_calls),
                answer: Some("second"),
            }),
        ]);

        let found = chain.fetch("any").await.expect("no fault");
        assert_eq!(found.as_deref(), Some("first"));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_through_misses() {
        let chain: ChainFetcher<String> = ChainFetcher::new(vec![
            Arc::new(Counting {
                calls: Arc::new(AtomicUsize::new(0)),
                answer: None,
            }),
            Arc::new(Counting {
                calls: Arc::new(AtomicUsize::new(0)),
                answer: Some("second"),
            }),
        ]);

        let found = chain.fetch("any").await.expect("no fault");
        assert_eq!(found.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn faults_propagate_to_the_caller() {
        let chain: ChainFetcher<String> = ChainFetcher::new(vec![Arc::new(Faulty)]);
        assert!(matches!(
            chain.fetch("any").await,
            Err(FetchError::Failed(message)) if message == "boom"
        ));
    }

    #[tokio::test]
    async fn none_fetcher_never_finds_anything() {
        let found = Fetcher::<Bytes>::fetch(&NoneFetcher, "file:///etc/hostname")
            .await
            .expect("no fault");
        assert!(found.is_none());
    }
}
