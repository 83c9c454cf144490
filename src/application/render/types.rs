use std::{fmt, path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::{
    engine::{EngineError, ImageFormat, Locale, RenderJob, UrlJoin},
    infra::fetch::{FetcherSet, ImageFetcher, StylesheetFetcher},
};

/// Per-call overrides for a render entry point. Unset fields take the
/// defaults of the entry point being called.
#[derive(Clone, Default)]
pub struct RenderOptions {
    pub base_url: Option<String>,
    pub dpi: Option<f32>,
    pub max_width: Option<u32>,
    pub device_height: Option<u32>,
    pub default_font_size: Option<f32>,
    pub font_name: Option<String>,
    pub locale: Option<Locale>,
    pub allow_refit: Option<bool>,
    pub image_format: Option<ImageFormat>,
    pub image_fetcher: Option<ImageFetcher>,
    pub stylesheet_fetcher: Option<StylesheetFetcher>,
    pub url_join: Option<UrlJoin>,
}

impl fmt::Debug for RenderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderOptions")
            .field("base_url", &self.base_url)
            .field("dpi", &self.dpi)
            .field("max_width", &self.max_width)
            .field("device_height", &self.device_height)
            .field("default_font_size", &self.default_font_size)
            .field("font_name", &self.font_name)
            .field("locale", &self.locale)
            .field("allow_refit", &self.allow_refit)
            .field("image_format", &self.image_format)
            .field("custom_image_fetcher", &self.image_fetcher.is_some())
            .field("custom_stylesheet_fetcher", &self.stylesheet_fetcher.is_some())
            .finish_non_exhaustive()
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_dpi(mut self, dpi: f32) -> Self {
        self.dpi = Some(dpi);
        self
    }

    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.max_width = Some(max_width);
        self
    }

    pub fn with_device_height(mut self, device_height: u32) -> Self {
        self.device_height = Some(device_height);
        self
    }

    pub fn with_default_font_size(mut self, points: f32) -> Self {
        self.default_font_size = Some(points);
        self
    }

    pub fn with_font_name(mut self, font_name: impl Into<String>) -> Self {
        self.font_name = Some(font_name.into());
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = Some(locale);
        self
    }

    pub fn with_allow_refit(mut self, allow_refit: bool) -> Self {
        self.allow_refit = Some(allow_refit);
        self
    }

    pub fn with_image_format(mut self, format: ImageFormat) -> Self {
        self.image_format = Some(format);
        self
    }

    pub fn with_image_fetcher(mut self, fetcher: ImageFetcher) -> Self {
        self.image_fetcher = Some(fetcher);
        self
    }

    pub fn with_stylesheet_fetcher(mut self, fetcher: StylesheetFetcher) -> Self {
        self.stylesheet_fetcher = Some(fetcher);
        self
    }

    pub fn with_url_join(mut self, join: UrlJoin) -> Self {
        self.url_join = Some(join);
        self
    }

    /// Resolve the options into a job. `defaults` carries the entry-point
    /// specific width, height and base URL.
    pub(crate) fn into_job(self, markup: String, defaults: EntryDefaults) -> RenderJob {
        let mut job = RenderJob::new(markup);
        job.base_url = self.base_url.unwrap_or(defaults.base_url);
        job.max_width = self.max_width.unwrap_or(defaults.max_width);
        job.device_height = self.device_height.unwrap_or(defaults.device_height);
        if let Some(dpi) = self.dpi {
            job.dpi = dpi;
        }
        if let Some(size) = self.default_font_size {
            job.default_font_size = size;
        }
        if let Some(font_name) = self.font_name {
            job.font_name = font_name;
        }
        if let Some(locale) = self.locale {
            job.locale = locale;
        }
        if let Some(allow_refit) = self.allow_refit {
            job.allow_refit = allow_refit;
        }
        if let Some(format) = self.image_format {
            job.image_format = format;
        }
        if let Some(join) = self.url_join {
            job.url_join = join;
        }
        job.fetchers = match (self.image_fetcher, self.stylesheet_fetcher) {
            (None, None) => FetcherSet::default(),
            (images, stylesheets) => {
                let FetcherSet {
                    images: default_images,
                    stylesheets: default_stylesheets,
                } = FetcherSet::default();
                FetcherSet::new(
                    images.unwrap_or(default_images),
                    stylesheets.unwrap_or(default_stylesheets),
                )
            }
        };
        job
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EntryDefaults {
    pub max_width: u32,
    pub device_height: u32,
    pub base_url: String,
}

impl EntryDefaults {
    pub(crate) fn new(max_width: u32, device_height: u32, base_url: impl Into<String>) -> Self {
        Self {
            max_width,
            device_height,
            base_url: base_url.into(),
        }
    }
}

/// Markdown source: inline text, or a file read when the text is empty.
#[derive(Debug, Clone, Default)]
pub struct MarkdownInput {
    pub text: Option<String>,
    pub path: Option<PathBuf>,
}

impl MarkdownInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            path: None,
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            text: None,
            path: Some(path.into()),
        }
    }
}

/// Hook run against a template environment before rendering, typically to
/// register custom filters.
pub type TemplateCustomizer = Arc<dyn Fn(&mut minijinja::Environment<'static>) + Send + Sync>;

/// A named template inside a template directory.
#[derive(Clone)]
pub struct TemplateSpec {
    pub dir: PathBuf,
    pub name: String,
    pub customize: Option<TemplateCustomizer>,
}

impl TemplateSpec {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            customize: None,
        }
    }

    pub fn with_customizer<F>(mut self, customize: F) -> Self
    where
        F: Fn(&mut minijinja::Environment<'static>) + Send + Sync + 'static,
    {
        self.customize = Some(Arc::new(customize));
        self
    }
}

impl std::fmt::Debug for TemplateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSpec")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("customized", &self.customize.is_some())
            .finish()
    }
}

/// Errors that abort a single render call. Resource lookups never surface
/// here; they degrade to missing resources inside the engine.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("markdown content or a markdown path must be provided")]
    MissingContent,
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template rendering failed: {message}")]
    Template { message: String },
    #[error("markdown conversion failed: {message}")]
    Markdown { message: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("render task failed: {message}")]
    Runtime { message: String },
}

impl RenderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    pub fn markdown(message: impl Into<String>) -> Self {
        Self::Markdown {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::fetch::NoneFetcher;

    #[test]
    fn entry_defaults_apply_when_unset() {
        let job = RenderOptions::new().into_job(
            "<p>hi</p>".into(),
            EntryDefaults::new(500, 10, "file:///srv/templates/"),
        );
        assert_eq!(job.max_width, 500);
        assert_eq!(job.device_height, 10);
        assert_eq!(job.base_url, "file:///srv/templates/");
        assert_eq!(job.dpi, 144.0);
        assert!(job.allow_refit);
        assert_eq!(job.image_format, ImageFormat::Png);
    }

    #[test]
    fn explicit_options_override_entry_defaults() {
        let job = RenderOptions::new()
            .with_max_width(320)
            .with_base_url("https://example.test/")
            .with_allow_refit(false)
            .with_image_format(ImageFormat::jpeg(70))
            .with_locale(Locale::new("en", "US"))
            .with_stylesheet_fetcher(Arc::new(NoneFetcher))
            .into_job(String::new(), EntryDefaults::new(800, 600, ""));
        assert_eq!(job.max_width, 320);
        assert_eq!(job.device_height, 600);
        assert_eq!(job.base_url, "https://example.test/");
        assert!(!job.allow_refit);
        assert_eq!(job.image_format, ImageFormat::Jpeg { quality: 70 });
        assert_eq!(job.locale.tag(), "en-US");
    }

    #[test]
    fn debug_output_reports_fetcher_overrides() {
        let options = RenderOptions::new()
            .with_max_width(320)
            .with_image_fetcher(Arc::new(NoneFetcher));
        let rendered = format!("{options:?}");
        assert!(rendered.contains("max_width: Some(320)"));
        assert!(rendered.contains("custom_image_fetcher: true"));
        assert!(rendered.contains("custom_stylesheet_fetcher: false"));
    }
}
