//! Markup-to-image rendering with host-driven asynchronous resource fetching.
//!
//! [`application::render::RenderOrchestrator`] turns HTML, Markdown, text and
//! directory templates into PNG or JPEG bytes. The rendering engine runs on a
//! blocking worker and resolves images and stylesheets through
//! [`application::bridge::FetchBridge`], which schedules the async fetchers of
//! [`infra::fetch`] on the caller's tokio runtime.

pub mod application;
pub mod config;
pub mod engine;
pub mod infra;

pub use application::{
    bridge::{BridgeError, FetchBridge, FetchResult},
    render::{
        MarkdownInput, RenderError, RenderOptions, RenderOrchestrator, TemplateSpec,
        render_service, template_to_html,
    },
};
pub use engine::{ImageFormat, Locale, RasterEngine, RenderEngine, RenderJob};
pub use infra::fetch::{FetchRequest, Fetcher, FetcherSet, ResourceKind};
