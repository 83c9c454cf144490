use std::{fmt, sync::Arc};

use url::Url;

use crate::infra::fetch::FetcherSet;

pub const DEFAULT_DPI: f32 = 144.0;
pub const DEFAULT_FONT_SIZE_PT: f32 = 12.0;
pub const DEFAULT_FONT_NAME: &str = "sans-serif";
pub const DEFAULT_JPEG_QUALITY: u8 = 100;

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg {
        quality: u8,
    },
}

impl ImageFormat {
    /// JPEG with the quality clamped to `1..=100`.
    pub fn jpeg(quality: u8) -> Self {
        Self::Jpeg {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg { .. } => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg { .. } => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    pub language: String,
    pub culture: String,
}

impl Locale {
    pub fn new(language: impl Into<String>, culture: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            culture: culture.into(),
        }
    }

    /// BCP 47 style tag, e.g. `zh-CN`.
    pub fn tag(&self) -> String {
        if self.culture.is_empty() {
            self.language.clone()
        } else {
            format!("{}-{}", self.language, self.culture)
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::new("zh", "CN")
    }
}

/// Resolves a reference found in the document against the job's base URL.
#[derive(Clone)]
pub struct UrlJoin(Arc<dyn Fn(&str, &str) -> String + Send + Sync>);

impl UrlJoin {
    pub fn new<F>(join: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(join))
    }

    pub fn join(&self, base: &str, reference: &str) -> String {
        (self.0)(base, reference)
    }
}

impl Default for UrlJoin {
    fn default() -> Self {
        Self::new(join_url)
    }
}

impl fmt::Debug for UrlJoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UrlJoin(..)")
    }
}

/// WHATWG join. An empty or unparseable base leaves the reference unchanged.
pub fn join_url(base: &str, reference: &str) -> String {
    if base.is_empty() {
        return reference.to_owned();
    }
    Url::parse(base)
        .and_then(|base| base.join(reference))
        .map(String::from)
        .unwrap_or_else(|_| reference.to_owned())
}

/// Everything one render call hands to the engine.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub markup: String,
    pub base_url: String,
    pub dpi: f32,
    /// Layout width in CSS pixels.
    pub max_width: u32,
    /// Viewport height in CSS pixels, used for `vh` lengths.
    pub device_height: u32,
    /// Root font size in points.
    pub default_font_size: f32,
    pub font_name: String,
    pub locale: Locale,
    pub allow_refit: bool,
    pub image_format: ImageFormat,
    pub fetchers: FetcherSet,
    pub url_join: UrlJoin,
}

impl RenderJob {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            base_url: String::new(),
            dpi: DEFAULT_DPI,
            max_width: 800,
            device_height: 600,
            default_font_size: DEFAULT_FONT_SIZE_PT,
            font_name: DEFAULT_FONT_NAME.to_owned(),
            locale: Locale::default(),
            allow_refit: true,
            image_format: ImageFormat::Png,
            fetchers: FetcherSet::default(),
            url_join: UrlJoin::default(),
        }
    }

    /// CSS pixel to device pixel ratio.
    pub fn scale(&self) -> f32 {
        if self.dpi > 0.0 { self.dpi / 96.0 } else { 1.0 }
    }

    /// Root font size in CSS pixels.
    pub fn root_font_px(&self) -> f32 {
        if self.default_font_size > 0.0 {
            self.default_font_size * 96.0 / 72.0
        } else {
            16.0
        }
    }

    pub fn resolve(&self, reference: &str) -> String {
        self.url_join.join(&self.base_url, reference)
    }
}
