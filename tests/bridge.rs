use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use bytes::Bytes;
use htmlkit::{
    application::bridge::{BridgeError, FetchBridge},
    infra::fetch::{FetchError, FetcherSet, FnFetcher, NoneFetcher},
};
use tokio::runtime::{Builder, Runtime};

fn runtime() -> Runtime {
    Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime")
}

fn image_fetchers<F, Fut>(fetch: F) -> FetcherSet
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Option<Bytes>, FetchError>> + Send + 'static,
{
    FetcherSet::new(Arc::new(FnFetcher::new(fetch)), Arc::new(NoneFetcher))
}

/// Collects the variant names of every reported fault.
fn recording_sink(bridge: FetchBridge) -> (FetchBridge, Arc<Mutex<Vec<&'static str>>>) {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let bridge = bridge.with_error_sink(move |err| {
        let name = match err {
            BridgeError::FetcherFailed { .. } => "failed",
            BridgeError::FetcherPanicked { .. } => "panicked",
            BridgeError::TimedOut { .. } => "timed_out",
            BridgeError::LoopUnavailable { .. } => "loop_unavailable",
        };
        sink.lock().expect("sink lock").push(name);
    });
    (bridge, reported)
}

#[test]
fn immediate_fetcher_resolves_from_a_plain_thread() {
    let rt = runtime();
    let bridge = FetchBridge::new(
        rt.handle().clone(),
        image_fetchers(|url: String| async move { Ok(Some(Bytes::from(url.into_bytes()))) }),
    );

    let found = thread::spawn(move || bridge.fetch_image("file:///a.png"))
        .join()
        .expect("engine thread");
    assert_eq!(found.as_deref(), Some(&b"file:///a.png"[..]));
}

#[test]
fn delayed_fetcher_resolves_without_deadlock() {
    let rt = runtime();
    let bridge = FetchBridge::new(
        rt.handle().clone(),
        image_fetchers(|_url: String| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Some(Bytes::from_static(b"late")))
        }),
    );

    let results = thread::spawn(move || {
        (0..3)
            .map(|index| bridge.fetch_image(&format!("https://example.test/{index}.png")))
            .collect::<Vec<_>>()
    })
    .join()
    .expect("engine thread");
    assert!(results.iter().all(|found| found.as_deref() == Some(&b"late"[..])));
}

#[test]
fn stalled_fetch_times_out_as_not_found() {
    let rt = runtime();
    let bridge = FetchBridge::new(
        rt.handle().clone(),
        image_fetchers(|_url: String| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Some(Bytes::from_static(b"never")))
        }),
    )
    .with_timeout(Some(Duration::from_millis(50)));
    let (bridge, reported) = recording_sink(bridge);

    let found = thread::spawn(move || bridge.fetch_image("https://stalled.test/a.png"))
        .join()
        .expect("engine thread");
    assert!(found.is_none());
    assert_eq!(*reported.lock().expect("sink lock"), vec!["timed_out"]);
}

#[test]
fn fetcher_faults_and_panics_are_absorbed() {
    let rt = runtime();
    let (failing, failed_reports) = recording_sink(FetchBridge::new(
        rt.handle().clone(),
        image_fetchers(|_url: String| async move { Err(FetchError::failed("disk on fire")) }),
    ));
    let (panicking, panicked_reports) = recording_sink(FetchBridge::new(
        rt.handle().clone(),
        image_fetchers(|_url: String| async move {
            if true {
                panic!("fetcher exploded");
            }
            Ok(None)
        }),
    ));

    let (failed, panicked) = thread::spawn(move || {
        (
            failing.fetch_image("file:///a.png"),
            panicking.fetch_image("file:///b.png"),
        )
    })
    .join()
    .expect("engine thread");

    assert!(failed.is_none());
    assert!(panicked.is_none());
    assert_eq!(*failed_reports.lock().expect("sink lock"), vec!["failed"]);
    assert_eq!(*panicked_reports.lock().expect("sink lock"), vec!["panicked"]);
}

#[test]
fn shut_down_runtime_reports_loop_unavailable() {
    let rt = runtime();
    let handle = rt.handle().clone();
    rt.shutdown_timeout(Duration::from_secs(1));

    let (bridge, reported) = recording_sink(FetchBridge::new(
        handle,
        image_fetchers(|_url: String| async move { Ok(Some(Bytes::from_static(b"x"))) }),
    ));

    let found = thread::spawn(move || bridge.fetch_image("file:///a.png"))
        .join()
        .expect("engine thread");
    assert!(found.is_none());
    assert_eq!(*reported.lock().expect("sink lock"), vec!["loop_unavailable"]);
}
