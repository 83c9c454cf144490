use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use htmlkit::infra::fetch::{
    ChainFetcher, FetchOutcome, Fetcher, HttpClient, LocalFileFetcher, NetworkFetcher,
    NoneFetcher, Resource,
};
use httpmock::MockServer;
use url::Url;

/// Stands in for the network and records whether it was consulted.
#[derive(Default)]
struct Unreachable {
    calls: AtomicUsize,
}

#[async_trait]
impl<R: Resource> Fetcher<R> for Unreachable {
    async fn fetch(&self, _url: &str) -> FetchOutcome<R> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

fn file_url(path: &std::path::Path) -> String {
    Url::from_file_path(path).expect("absolute path").to_string()
}

#[tokio::test]
async fn local_hit_never_consults_the_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image_path = dir.path().join("pixel.bin");
    let css_path = dir.path().join("site.css");
    std::fs::write(&image_path, [0_u8, 1, 2, 255]).expect("write image");
    std::fs::write(&css_path, "body { color: #333 }").expect("write css");

    let network = Arc::new(Unreachable::default());
    let images: ChainFetcher<Bytes> =
        ChainFetcher::new(vec![Arc::new(LocalFileFetcher), network.clone()]);
    let stylesheets: ChainFetcher<String> =
        ChainFetcher::new(vec![Arc::new(LocalFileFetcher), network.clone()]);

    let image = images
        .fetch(&file_url(&image_path))
        .await
        .expect("no fault")
        .expect("found locally");
    assert_eq!(&image[..], &[0, 1, 2, 255]);

    let css = stylesheets
        .fetch(&file_url(&css_path))
        .await
        .expect("no fault")
        .expect("found locally");
    assert_eq!(css, "body { color: #333 }");

    assert_eq!(network.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn local_miss_falls_back_to_the_network() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/theme.css");
            then.status(200)
                .header("content-type", "text/css")
                .body("h1 { color: red }");
        })
        .await;

    let chain: ChainFetcher<String> =
        ChainFetcher::local_then_network(NetworkFetcher::new(HttpClient::new()));
    let css = chain
        .fetch(&server.url("/theme.css"))
        .await
        .expect("no fault")
        .expect("served over http");

    assert_eq!(css, "h1 { color: red }");
    mock.assert_async().await;
}

#[tokio::test]
async fn error_status_is_not_found() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/missing.png");
            then.status(404);
        })
        .await;

    let chain: ChainFetcher<Bytes> =
        ChainFetcher::local_then_network(NetworkFetcher::new(HttpClient::new()));
    let found = chain
        .fetch(&server.url("/missing.png"))
        .await
        .expect("404 is not a fault");

    assert!(found.is_none());
    mock.assert_async().await;
}

#[tokio::test]
async fn undecodable_stylesheet_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/latin1.css");
            then.status(200).body(vec![0xff_u8, 0xfe, 0xfd]);
        })
        .await;

    let chain: ChainFetcher<String> =
        ChainFetcher::local_then_network(NetworkFetcher::new(HttpClient::new()));
    let found = chain
        .fetch(&server.url("/latin1.css"))
        .await
        .expect("decode failure is not a fault");
    assert!(found.is_none());
}

#[tokio::test]
async fn missing_everywhere_is_not_found() {
    let chain: ChainFetcher<Bytes> =
        ChainFetcher::local_then_network(NetworkFetcher::new(HttpClient::new()));
    let found = chain
        .fetch("http://127.0.0.1:9/nothing.png")
        .await
        .expect("transport failure is not a fault");
    assert!(found.is_none());

    let local_only = chain
        .fetch("file:///definitely/not/here.png")
        .await
        .expect("no fault");
    assert!(local_only.is_none());

    let disabled = Fetcher::<String>::fetch(&NoneFetcher, "file:///etc/hostname")
        .await
        .expect("no fault");
    assert!(disabled.is_none());
}
