//! Rendering engine boundary and the bundled raster engine.
//!
//! The orchestrator only sees [`RenderEngine`]: a synchronous call taking a
//! [`RenderJob`] and a [`ResourceLoader`] and returning encoded image bytes.
//! The loader is the engine's only way to reach external resources; every
//! call on it blocks until the resource is resolved or known to be absent.

pub mod dom;
pub mod fonts;
pub mod job;
pub mod layout;
pub mod paint;
pub mod style;

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

pub use fonts::{FontLibrary, init_font_database, shared_font_library};
pub use job::{ImageFormat, Locale, RenderJob, UrlJoin, join_url};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid document: {0}")]
    Document(String),
    #[error("canvas error: {0}")]
    Canvas(String),
    #[error("encode error: {0}")]
    Encode(String),
}

/// Synchronous resource resolution used while a document is laid out.
pub trait ResourceLoader: Send + Sync {
    fn load_image(&self, url: &str) -> Option<Bytes>;

    fn load_stylesheet(&self, url: &str) -> Option<String>;
}

pub trait RenderEngine: Send + Sync {
    fn render(&self, job: &RenderJob, loader: &dyn ResourceLoader) -> Result<Vec<u8>, EngineError>;
}

/// Markup to PNG/JPEG through `lol_html`, a CSS subset and `tiny-skia`.
#[derive(Clone)]
pub struct RasterEngine {
    fonts: Arc<FontLibrary>,
}

impl RasterEngine {
    pub fn new(fonts: Arc<FontLibrary>) -> Self {
        fonts::log_library(&fonts);
        Self { fonts }
    }

    /// Engine using the process-wide font library.
    pub fn with_shared_fonts() -> Self {
        Self::new(shared_font_library())
    }
}

impl std::fmt::Debug for RasterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterEngine")
            .field("faces", &self.fonts.len())
            .finish()
    }
}

impl RenderEngine for RasterEngine {
    fn render(&self, job: &RenderJob, loader: &dyn ResourceLoader) -> Result<Vec<u8>, EngineError> {
        let mut stage_started = Instant::now();
        let mut stage = |name: &'static str| {
            debug!(
                target = "engine::render",
                op = "engine::render",
                stage = name,
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "Render stage finished"
            );
            stage_started = Instant::now();
        };

        let root = dom::parse(&job.markup)?;
        stage("parse");

        let sheets = style::collect_stylesheets(&root, job, loader);
        let resolver = style::StyleResolver::new(sheets, job);
        stage("style");

        let shaper = fonts::TextShaper::new(&self.fonts, &job.locale);
        let page = layout::layout(&root, job, loader, &resolver, &shaper);
        stage("layout");

        let pixmap = paint::paint(&page, job.scale(), &self.fonts)?;
        stage("paint");

        let encoded = paint::encode(&pixmap, job.image_format)?;
        stage("encode");
        Ok(encoded)
    }
}
