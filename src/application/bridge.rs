//! Cross-runtime bridge from the synchronous rendering engine to the async
//! fetchers running on the host tokio runtime.
//!
//! Each call-in creates a [`PendingCall`]: the fetcher future is spawned on the
//! runtime through a [`Handle`], its outcome is sent through a one-shot channel,
//! and the engine thread parks on the receiving end until the value arrives.
//! Faults never cross back into the engine. They are handed to the error sink
//! and the call resolves to "not found".
//!
//! Blocking is only legal off the runtime: on a plain thread, or on a blocking
//! pool thread marked with [`EngineThread::enter`].

use std::{
    any::Any,
    cell::Cell,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::FutureExt;
use thiserror::Error;
use tokio::{runtime::Handle, sync::oneshot};
use tracing::{debug, error};

use crate::{
    engine::ResourceLoader,
    infra::fetch::{FetchError, FetchRequest, Fetcher, FetcherSet, Resource, ResourceKind},
};

/// Default bound on a single loop-side fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{kind} fetcher failed for `{url}`: {source}")]
    FetcherFailed {
        url: String,
        kind: ResourceKind,
        #[source]
        source: FetchError,
    },
    #[error("{kind} fetcher panicked for `{url}`: {message}")]
    FetcherPanicked {
        url: String,
        kind: ResourceKind,
        message: String,
    },
    #[error("{kind} fetch for `{url}` timed out after {timeout:?}")]
    TimedOut {
        url: String,
        kind: ResourceKind,
        timeout: Duration,
    },
    #[error("event loop unavailable for {kind} fetch of `{url}`: {reason}")]
    LoopUnavailable {
        url: String,
        kind: ResourceKind,
        reason: String,
    },
}

impl BridgeError {
    fn loop_unavailable(request: &FetchRequest, reason: impl Into<String>) -> Self {
        Self::LoopUnavailable {
            url: request.url.clone(),
            kind: request.kind,
            reason: reason.into(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            BridgeError::FetcherFailed { url, .. }
            | BridgeError::FetcherPanicked { url, .. }
            | BridgeError::TimedOut { url, .. }
            | BridgeError::LoopUnavailable { url, .. } => url,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            BridgeError::FetcherFailed { kind, .. }
            | BridgeError::FetcherPanicked { kind, .. }
            | BridgeError::TimedOut { kind, .. }
            | BridgeError::LoopUnavailable { kind, .. } => *kind,
        }
    }
}

/// Receives every fault the bridge absorbs.
pub type ErrorSink = Arc<dyn Fn(&BridgeError) + Send + Sync>;

fn log_bridge_error(err: &BridgeError) {
    error!(
        target = "application::bridge",
        op = "bridge::fetch",
        result = "fault",
        kind = %err.kind(),
        url = err.url(),
        error = %err,
        "Resource fetch faulted; treating as not found"
    );
}

/// Result of one call-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Image(Bytes),
    Stylesheet(String),
    NotFound,
}

impl FetchResult {
    pub fn is_found(&self) -> bool {
        !matches!(self, FetchResult::NotFound)
    }
}

thread_local! {
    static ENGINE_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as an engine thread for as long as the guard
/// lives. Blocking pool threads carry a runtime context, so the bridge only
/// blocks on them when they are marked.
#[must_use = "the mark is removed when the guard drops"]
pub struct EngineThread {
    previous: bool,
}

impl EngineThread {
    pub fn enter() -> Self {
        Self {
            previous: ENGINE_THREAD.replace(true),
        }
    }

    /// Whether a blocking wait on this thread cannot stall a runtime worker.
    pub fn can_block() -> bool {
        ENGINE_THREAD.get() || Handle::try_current().is_err()
    }
}

impl Drop for EngineThread {
    fn drop(&mut self) {
        ENGINE_THREAD.set(self.previous);
    }
}

#[derive(Clone)]
pub struct FetchBridge {
    handle: Option<Handle>,
    fetchers: FetcherSet,
    timeout: Option<Duration>,
    sink: ErrorSink,
}

impl FetchBridge {
    /// Bridge scheduling onto the runtime behind `handle`. The runtime must
    /// have its time driver enabled when a timeout is configured.
    pub fn new(handle: Handle, fetchers: FetcherSet) -> Self {
        Self {
            handle: Some(handle),
            fetchers,
            timeout: Some(DEFAULT_FETCH_TIMEOUT),
            sink: Arc::new(log_bridge_error),
        }
    }

    /// Bridge with no runtime behind it. Every fetch is reported as
    /// [`BridgeError::LoopUnavailable`] and resolves to not found.
    pub fn detached(fetchers: FetcherSet) -> Self {
        Self {
            handle: None,
            fetchers,
            timeout: Some(DEFAULT_FETCH_TIMEOUT),
            sink: Arc::new(log_bridge_error),
        }
    }

    /// Bound each fetch; `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&BridgeError) + Send + Sync + 'static,
    {
        self.sink = Arc::new(sink);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Resolve `request` through the fetcher matching its kind, blocking the
    /// calling thread until the runtime answers.
    ///
    /// Calls from a thread inside the runtime that is not marked with
    /// [`EngineThread::enter`] are reported as [`BridgeError::LoopUnavailable`]
    /// and resolve to [`FetchResult::NotFound`] without blocking.
    pub fn fetch(&self, request: FetchRequest) -> FetchResult {
        match request.kind {
            ResourceKind::Image => self
                .fetch_image(&request.url)
                .map_or(FetchResult::NotFound, FetchResult::Image),
            ResourceKind::Stylesheet => self
                .fetch_stylesheet(&request.url)
                .map_or(FetchResult::NotFound, FetchResult::Stylesheet),
        }
    }

    pub fn fetch_image(&self, url: &str) -> Option<Bytes> {
        self.call(Arc::clone(&self.fetchers.images), url)
    }

    pub fn fetch_stylesheet(&self, url: &str) -> Option<String> {
        self.call(Arc::clone(&self.fetchers.stylesheets), url)
    }

    fn call<R: Resource>(&self, fetcher: Arc<dyn Fetcher<R>>, url: &str) -> Option<R> {
        let started_at = Instant::now();
        let request = FetchRequest {
            url: url.to_owned(),
            kind: R::KIND,
        };
        let outcome = match self.handle.as_ref() {
            None => Err(BridgeError::loop_unavailable(
                &request,
                "no tokio runtime is available",
            )),
            Some(_) if !EngineThread::can_block() => Err(BridgeError::loop_unavailable(
                &request,
                "cannot block a thread driving the async runtime",
            )),
            Some(handle) => PendingCall::schedule(handle, fetcher, request, self.timeout).wait(),
        };

        match outcome {
            Ok(found) => {
                debug!(
                    target = "application::bridge",
                    op = "bridge::fetch",
                    result = if found.is_some() { "found" } else { "not_found" },
                    kind = %R::KIND,
                    url,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Resource fetch completed"
                );
                found
            }
            Err(err) => {
                (self.sink)(&err);
                None
            }
        }
    }
}

impl fmt::Debug for FetchBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchBridge")
            .field("fetchers", &self.fetchers)
            .field("timeout", &self.timeout)
            .field("detached", &self.handle.is_none())
            .finish_non_exhaustive()
    }
}

impl ResourceLoader for FetchBridge {
    fn load_image(&self, url: &str) -> Option<Bytes> {
        self.fetch_image(url)
    }

    fn load_stylesheet(&self, url: &str) -> Option<String> {
        self.fetch_stylesheet(url)
    }
}

type Slot<R> = oneshot::Receiver<Result<Option<R>, BridgeError>>;

/// One outstanding call-in. The one-shot channel is the single-assignment
/// result slot; the receiver blocks until the loop-side task writes it or is
/// dropped.
struct PendingCall<R> {
    request: FetchRequest,
    slot: Slot<R>,
}

impl<R: Resource> PendingCall<R> {
    fn schedule(
        handle: &Handle,
        fetcher: Arc<dyn Fetcher<R>>,
        request: FetchRequest,
        timeout: Option<Duration>,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let task_request = request.clone();
        // A runtime that has shut down drops the task unpolled, which drops
        // `tx` and wakes the waiter with a closed channel.
        handle.spawn(async move {
            let outcome = run_fetcher(fetcher, task_request, timeout).await;
            let _ = tx.send(outcome);
        });
        Self { request, slot: rx }
    }

    fn wait(self) -> Result<Option<R>, BridgeError> {
        let Self { request, slot } = self;
        match panic::catch_unwind(AssertUnwindSafe(move || slot.blocking_recv())) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(BridgeError::loop_unavailable(
                &request,
                "runtime dropped the scheduled fetch",
            )),
            Err(payload) => Err(BridgeError::loop_unavailable(
                &request,
                format!(
                    "cannot block inside the async runtime: {}",
                    panic_message(payload.as_ref())
                ),
            )),
        }
    }
}

async fn run_fetcher<R: Resource>(
    fetcher: Arc<dyn Fetcher<R>>,
    request: FetchRequest,
    timeout: Option<Duration>,
) -> Result<Option<R>, BridgeError> {
    let call = AssertUnwindSafe(fetcher.fetch(&request.url)).catch_unwind();
    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(caught) => caught,
            Err(_elapsed) => {
                return Err(BridgeError::TimedOut {
                    url: request.url,
                    kind: request.kind,
                    timeout: limit,
                });
            }
        },
        None => call.await,
    };

    match caught {
        Ok(Ok(found)) => Ok(found),
        Ok(Err(source)) => Err(BridgeError::FetcherFailed {
            url: request.url,
            kind: request.kind,
            source,
        }),
        Err(payload) => Err(BridgeError::FetcherPanicked {
            message: panic_message(payload.as_ref()),
            url: request.url,
            kind: request.kind,
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::fetch::{FnFetcher, NoneFetcher};
    use std::sync::Mutex;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("runtime")
    }

    fn css_fetchers(css: &'static str) -> FetcherSet {
        FetcherSet::new(
            Arc::new(NoneFetcher),
            Arc::new(FnFetcher::new(move |_url: String| async move {
                Ok::<_, FetchError>(Some(css.to_owned()))
            })),
        )
    }

    #[test]
    fn fetch_dispatches_on_kind() {
        let rt = runtime();
        let bridge = FetchBridge::new(rt.handle().clone(), css_fetchers("p {}"));

        assert_eq!(
            bridge.fetch(FetchRequest::stylesheet("file:///a.css")),
            FetchResult::Stylesheet("p {}".to_owned())
        );
        assert_eq!(
            bridge.fetch(FetchRequest::image("file:///a.png")),
            FetchResult::NotFound
        );
    }

    #[test]
    fn calls_from_inside_the_runtime_are_reported() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink_reported = Arc::clone(&reported);
        let bridge = FetchBridge::new(rt.handle().clone(), css_fetchers("p {}"))
            .with_error_sink(move |err| {
                sink_reported
                    .lock()
                    .expect("sink lock")
                    .push(matches!(err, BridgeError::LoopUnavailable { .. }));
            });

        let found = rt.block_on(async { bridge.fetch_stylesheet("file:///a.css") });
        assert!(found.is_none());
        assert_eq!(*reported.lock().expect("sink lock"), vec![true]);
    }

    #[test]
    fn marked_blocking_threads_resolve_fetches() {
        let rt = runtime();
        let bridge = FetchBridge::new(rt.handle().clone(), css_fetchers("p {}"));

        let found = rt.block_on(async move {
            tokio::task::spawn_blocking(move || {
                let _engine_thread = EngineThread::enter();
                bridge.fetch_stylesheet("file:///a.css")
            })
            .await
            .expect("blocking task")
        });
        assert_eq!(found.as_deref(), Some("p {}"));
    }

    #[test]
    fn engine_thread_mark_is_scoped() {
        let rt = runtime();
        let _runtime_context = rt.enter();
        assert!(!EngineThread::can_block());
        {
            let _engine_thread = EngineThread::enter();
            assert!(EngineThread::can_block());
        }
        assert!(!EngineThread::can_block());
    }

    #[test]
    fn detached_bridges_report_every_fetch() {
        let reported = Arc::new(Mutex::new(0_usize));
        let sink_reported = Arc::clone(&reported);
        let bridge = FetchBridge::detached(css_fetchers("p {}")).with_error_sink(move |err| {
            assert!(matches!(err, BridgeError::LoopUnavailable { .. }));
            *sink_reported.lock().expect("sink lock") += 1;
        });

        assert_eq!(
            bridge.fetch(FetchRequest::stylesheet("file:///a.css")),
            FetchResult::NotFound
        );
        assert!(bridge.fetch_image("file:///a.png").is_none());
        assert_eq!(*reported.lock().expect("sink lock"), 2);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
