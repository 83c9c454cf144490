//! Render entry points: build markup, assemble a [`RenderJob`] and drive the
//! engine on a blocking worker while the bridge serves its resource lookups
//! from the current runtime.

mod markdown;
mod templates;
mod types;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use url::Url;

use crate::{
    application::bridge::{DEFAULT_FETCH_TIMEOUT, EngineThread, ErrorSink, FetchBridge},
    config::RenderSettings,
    engine::{RasterEngine, RenderEngine, RenderJob},
};

pub use markdown::{MarkdownHtml, MarkdownRenderer, markdown_renderer};
pub use templates::{
    BUNDLED_TEMPLATES_DIR, GITHUB_MARKDOWN_CSS, MarkdownPage, TEXT_CSS, TextPage, template_to_html,
};
pub use types::{
    MarkdownInput, RenderError, RenderOptions, TemplateCustomizer, TemplateSpec,
};

use types::EntryDefaults;

const HTML_DEFAULTS: (u32, u32) = (800, 600);
const MARKDOWN_DEFAULTS: (u32, u32) = (500, 10);
const TEXT_DEFAULTS: (u32, u32) = (500, 600);
const TEMPLATE_DEFAULTS: (u32, u32) = (500, 10);

/// Drives a [`RenderEngine`] for every entry point.
#[derive(Clone)]
pub struct RenderOrchestrator {
    engine: Arc<dyn RenderEngine>,
    fetch_timeout: Option<Duration>,
    error_sink: Option<ErrorSink>,
}

impl RenderOrchestrator {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            engine,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            error_sink: None,
        }
    }

    /// Orchestrator over the bundled raster engine, configured from settings.
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self::new(Arc::new(RasterEngine::with_shared_fonts()))
            .with_fetch_timeout(settings.fetch_timeout)
    }

    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Replace the logging sink bridge faults are reported to.
    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout
    }

    /// Render an HTML document.
    pub async fn render(
        &self,
        markup: impl Into<String>,
        options: RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        let (max_width, device_height) = HTML_DEFAULTS;
        let job = options.into_job(
            markup.into(),
            EntryDefaults::new(max_width, device_height, ""),
        );
        self.render_job(job).await
    }

    /// Render Markdown through the bundled GitHub-style page. `css_path`
    /// replaces the bundled stylesheet.
    pub async fn render_markdown(
        &self,
        input: MarkdownInput,
        css_path: Option<&Path>,
        options: RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        let source = match (input.text, input.path) {
            (Some(text), _) if !text.is_empty() => text,
            (_, Some(path)) => read_file(&path).await?,
            _ => return Err(RenderError::MissingContent),
        };

        let converted = markdown_renderer().to_html(&source)?;
        let css = match css_path {
            Some(path) => read_file(path).await?,
            None => format!(
                "{GITHUB_MARKDOWN_CSS}\n{}",
                markdown_renderer().highlight_css()
            ),
        };
        let markup = templates::render_page(&MarkdownPage {
            css: &css,
            body: &converted.html,
        })?;

        let (max_width, device_height) = MARKDOWN_DEFAULTS;
        let job = options.into_job(
            markup,
            EntryDefaults::new(max_width, device_height, stylesheet_base_url(css_path)),
        );
        self.render_job(job).await
    }

    /// Render plain text, one paragraph per line.
    pub async fn render_text(
        &self,
        text: &str,
        css_path: Option<&Path>,
        options: RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        let css = match css_path {
            Some(path) => read_file(path).await?,
            None => TEXT_CSS.to_owned(),
        };
        let markup = templates::render_page(&TextPage::new(text, &css))?;

        let (max_width, device_height) = TEXT_DEFAULTS;
        let job = options.into_job(
            markup,
            EntryDefaults::new(max_width, device_height, stylesheet_base_url(css_path)),
        );
        self.render_job(job).await
    }

    /// Render a directory template; relative references resolve against the
    /// template directory unless the options say otherwise.
    pub async fn render_template<C>(
        &self,
        spec: &TemplateSpec,
        context: &C,
        options: RenderOptions,
    ) -> Result<Vec<u8>, RenderError>
    where
        C: Serialize + ?Sized,
    {
        let markup = template_to_html(spec, context)?;
        let (max_width, device_height) = TEMPLATE_DEFAULTS;
        let job = options.into_job(
            markup,
            EntryDefaults::new(max_width, device_height, file_base_url(&spec.dir)),
        );
        self.render_job(job).await
    }

    /// Run the engine over a fully assembled job.
    ///
    /// Outside a tokio runtime the engine runs on the calling thread and
    /// every resource lookup resolves to not found.
    pub async fn render_job(&self, job: RenderJob) -> Result<Vec<u8>, RenderError> {
        let format = job.image_format;
        let started_at = Instant::now();
        let outcome = match Handle::try_current() {
            Ok(handle) => {
                let bridge = self.bridge(FetchBridge::new(handle.clone(), job.fetchers.clone()));
                let engine = Arc::clone(&self.engine);
                handle
                    .spawn_blocking(move || {
                        let _engine_thread = EngineThread::enter();
                        engine.render(&job, &bridge)
                    })
                    .await
                    .map_err(|err| RenderError::runtime(err.to_string()))
                    .and_then(|rendered| rendered.map_err(RenderError::from))
            }
            Err(err) => {
                warn!(
                    target = "application::render",
                    op = "render::job",
                    error = %err,
                    "No tokio runtime; rendering without resource fetches"
                );
                let bridge = self.bridge(FetchBridge::detached(job.fetchers.clone()));
                self.engine.render(&job, &bridge).map_err(RenderError::from)
            }
        };

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        match &outcome {
            Ok(bytes) => info!(
                target = "application::render",
                op = "render::job",
                result = "ok",
                format = format.extension(),
                bytes = bytes.len(),
                elapsed_ms,
                "Render finished"
            ),
            Err(err) => error!(
                target = "application::render",
                op = "render::job",
                result = "error",
                elapsed_ms,
                error = %err,
                "Render failed"
            ),
        }
        outcome
    }
}

impl RenderOrchestrator {
    fn bridge(&self, bridge: FetchBridge) -> FetchBridge {
        let bridge = bridge.with_timeout(self.fetch_timeout);
        match self.error_sink.clone() {
            Some(sink) => bridge.with_error_sink(move |err| sink(err)),
            None => bridge,
        }
    }
}

impl std::fmt::Debug for RenderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOrchestrator")
            .field("fetch_timeout", &self.fetch_timeout)
            .field("custom_error_sink", &self.error_sink.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum RenderConfigError {
    #[error("render service already configured")]
    AlreadyConfigured,
}

static RENDER_SERVICE: OnceCell<Arc<RenderOrchestrator>> = OnceCell::new();

/// Install the process-wide orchestrator. Must run before the first
/// [`render_service`] call.
pub fn configure_render_service(orchestrator: RenderOrchestrator) -> Result<(), RenderConfigError> {
    RENDER_SERVICE
        .set(Arc::new(orchestrator))
        .map_err(|_| RenderConfigError::AlreadyConfigured)
}

/// Access the shared orchestrator, falling back to the raster engine with
/// default settings.
pub fn render_service() -> Arc<RenderOrchestrator> {
    Arc::clone(RENDER_SERVICE.get_or_init(|| {
        Arc::new(RenderOrchestrator::from_settings(&RenderSettings::default()))
    }))
}

async fn read_file(path: &Path) -> Result<String, RenderError> {
    let read = if Handle::try_current().is_ok() {
        tokio::fs::read_to_string(path).await
    } else {
        std::fs::read_to_string(path)
    };
    read.map_err(|err| RenderError::io(path, err))
}

fn stylesheet_base_url(css_path: Option<&Path>) -> String {
    match css_path {
        Some(path) => file_base_url(path),
        None => file_base_url(Path::new(BUNDLED_TEMPLATES_DIR)),
    }
}

/// `file://` URL for `path`; directories end with a slash so relative
/// references resolve inside them.
fn file_base_url(path: &Path) -> String {
    let absolute: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let url = if absolute.is_dir() {
        Url::from_directory_path(&absolute)
    } else {
        Url::from_file_path(&absolute)
    };
    url.map(String::from)
        .unwrap_or_else(|()| format!("file://{}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        application::bridge::BridgeError,
        engine::{EngineError, ResourceLoader},
    };
    use std::sync::Mutex;

    /// Engine that records the job it receives.
    #[derive(Default)]
    struct RecordingEngine {
        jobs: Mutex<Vec<(String, u32, u32, String)>>,
    }

    impl RenderEngine for RecordingEngine {
        fn render(
            &self,
            job: &RenderJob,
            _loader: &dyn ResourceLoader,
        ) -> Result<Vec<u8>, EngineError> {
            self.jobs.lock().expect("lock").push((
                job.markup.clone(),
                job.max_width,
                job.device_height,
                job.base_url.clone(),
            ));
            Ok(b"image".to_vec())
        }
    }

    #[tokio::test]
    async fn entry_points_apply_their_defaults() {
        let engine = Arc::new(RecordingEngine::default());
        let orchestrator = RenderOrchestrator::new(engine.clone());

        orchestrator
            .render("<p>x</p>", RenderOptions::new())
            .await
            .expect("html renders");
        orchestrator
            .render_markdown(MarkdownInput::text("# x"), None, RenderOptions::new())
            .await
            .expect("markdown renders");
        orchestrator
            .render_text("x", None, RenderOptions::new())
            .await
            .expect("text renders");

        let jobs = engine.jobs.lock().expect("lock");
        assert_eq!((jobs[0].1, jobs[0].2, jobs[0].3.as_str()), (800, 600, ""));
        assert_eq!((jobs[1].1, jobs[1].2), (500, 10));
        assert!(jobs[1].0.contains("<h1>x</h1>"));
        assert!(jobs[1].3.starts_with("file://"));
        assert!(jobs[1].3.ends_with("/templates/"));
        assert_eq!((jobs[2].1, jobs[2].2), (500, 600));
    }

    #[tokio::test]
    async fn markdown_requires_text_or_path() {
        let orchestrator = RenderOrchestrator::new(Arc::new(RecordingEngine::default()));
        let err = orchestrator
            .render_markdown(MarkdownInput::default(), None, RenderOptions::new())
            .await
            .expect_err("no content");
        assert!(matches!(err, RenderError::MissingContent));

        let err = orchestrator
            .render_markdown(
                MarkdownInput::path("/definitely/not/here.md"),
                None,
                RenderOptions::new(),
            )
            .await
            .expect_err("unreadable path");
        assert!(matches!(err, RenderError::Io { .. }));
    }

    #[tokio::test]
    async fn empty_text_falls_back_to_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.md");
        std::fs::write(&path, "from *file*").expect("write");

        let engine = Arc::new(RecordingEngine::default());
        let orchestrator = RenderOrchestrator::new(engine.clone());
        orchestrator
            .render_markdown(
                MarkdownInput {
                    text: Some(String::new()),
                    path: Some(path),
                },
                None,
                RenderOptions::new(),
            )
            .await
            .expect("renders from file");
        let jobs = engine.jobs.lock().expect("lock");
        assert!(jobs[0].0.contains("<em>file</em>"));
    }

    /// Engine that asks the loader for one stylesheet.
    struct LookupEngine;

    impl RenderEngine for LookupEngine {
        fn render(
            &self,
            _job: &RenderJob,
            loader: &dyn ResourceLoader,
        ) -> Result<Vec<u8>, EngineError> {
            let found = loader.load_stylesheet("file:///theme.css").is_some();
            Ok(vec![u8::from(found)])
        }
    }

    #[test]
    fn rendering_outside_a_runtime_downgrades_lookups() {
        let unavailable = Arc::new(Mutex::new(0_usize));
        let sink_count = Arc::clone(&unavailable);
        let orchestrator = RenderOrchestrator::new(Arc::new(LookupEngine)).with_error_sink(
            Arc::new(move |err: &BridgeError| {
                if matches!(err, BridgeError::LoopUnavailable { .. }) {
                    *sink_count.lock().expect("lock") += 1;
                }
            }),
        );

        let image = futures::executor::block_on(
            orchestrator.render("<p>x</p>", RenderOptions::new()),
        )
        .expect("render completes without a runtime");
        assert_eq!(image, vec![0]);
        assert_eq!(*unavailable.lock().expect("lock"), 1);
    }

    #[test]
    fn directory_base_urls_end_with_a_slash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = file_base_url(dir.path());
        assert!(url.starts_with("file:///"));
        assert!(url.ends_with('/'));

        let file = dir.path().join("style.css");
        std::fs::write(&file, "").expect("write");
        assert!(file_base_url(&file).ends_with("/style.css"));
    }
}
