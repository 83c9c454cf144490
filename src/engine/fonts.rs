//! Font discovery, face loading and glyph shaping.
//!
//! The system font database is loaded once per process. Loading happens inside
//! an [`EnvScope`] so the font configuration variables from the settings are
//! visible to fontdb's fontconfig parser and removed again afterwards.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use fontdb::{Database, Family, ID, Query, Stretch, Style, Weight};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use ttf_parser::{Face, GlyphId};

use crate::{
    config::FontconfigSettings,
    infra::{env_scope::EnvScope, error::InfraError},
};

use super::{job::Locale, style::ComputedStyle};

static FONT_LIBRARY: OnceCell<Arc<FontLibrary>> = OnceCell::new();

/// Load the system fonts with the configured overrides applied to the
/// environment. Later calls return the library built by the first one.
pub fn init_font_database(settings: &FontconfigSettings) -> Result<Arc<FontLibrary>, InfraError> {
    if let Some(library) = FONT_LIBRARY.get() {
        return Ok(Arc::clone(library));
    }

    let started_at = Instant::now();
    let database = EnvScope::run(settings.env_overrides(), load_system_database)?;
    let library = FONT_LIBRARY.get_or_init(|| Arc::new(FontLibrary::new(database)));
    info!(
        target = "engine::fonts",
        op = "fonts::init",
        result = "ok",
        faces = library.len(),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Font database loaded"
    );
    Ok(Arc::clone(library))
}

/// The process-wide library, loading system fonts without overrides when
/// startup did not initialise it.
pub fn shared_font_library() -> Arc<FontLibrary> {
    Arc::clone(FONT_LIBRARY.get_or_init(|| Arc::new(FontLibrary::new(load_system_database()))))
}

fn load_system_database() -> Database {
    let mut database = Database::new();
    database.load_system_fonts();
    if database.is_empty() {
        warn!(
            target = "engine::fonts",
            op = "fonts::load",
            result = "empty",
            "No system fonts found; text renders as ink bars"
        );
    }
    database
}

pub struct FaceData {
    bytes: Vec<u8>,
    index: u32,
}

impl FaceData {
    pub fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.bytes, self.index).ok()
    }
}

/// Font database plus caches of loaded face data and family lookups.
pub struct FontLibrary {
    database: Database,
    faces: Mutex<HashMap<ID, Option<Arc<FaceData>>>>,
    queries: Mutex<HashMap<(Vec<String>, bool, bool), Option<ID>>>,
}

impl FontLibrary {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            faces: Mutex::new(HashMap::new()),
            queries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.database.len()
    }

    pub fn is_empty(&self) -> bool {
        self.database.is_empty()
    }

    /// Best face for a CSS family list, falling back to any installed face.
    pub fn resolve(&self, families: &[String], bold: bool, italic: bool) -> Option<ID> {
        let key = (families.to_vec(), bold, italic);
        if let Ok(queries) = self.queries.lock()
            && let Some(found) = queries.get(&key)
        {
            return *found;
        }

        let mut names: Vec<String> = Vec::new();
        for family in families {
            match family.to_ascii_lowercase().as_str() {
                "sans-serif" | "system-ui" | "-apple-system" => {
                    names.extend(SANS_SERIF.iter().map(|name| (*name).to_owned()))
                }
                "serif" => names.extend(SERIF.iter().map(|name| (*name).to_owned())),
                "monospace" => names.extend(MONOSPACE.iter().map(|name| (*name).to_owned())),
                _ => names.push(family.clone()),
            }
        }
        let mut query_families: Vec<Family<'_>> =
            names.iter().map(|name| Family::Name(name)).collect();
        query_families.push(Family::SansSerif);

        let query = Query {
            families: &query_families,
            weight: if bold { Weight::BOLD } else { Weight::NORMAL },
            stretch: Stretch::Normal,
            style: if italic { Style::Italic } else { Style::Normal },
        };
        let found = self
            .database
            .query(&query)
            .or_else(|| self.database.faces().next().map(|face| face.id));

        if let Ok(mut queries) = self.queries.lock() {
            queries.insert(key, found);
        }
        found
    }

    /// Faces covering the scripts of `locale`, tried for characters the
    /// primary face lacks.
    pub fn fallbacks(&self, locale: &Locale) -> Vec<ID> {
        let preferred: &[&str] = match locale.language.to_ascii_lowercase().as_str() {
            "ja" => CJK_JA,
            "ko" => CJK_KO,
            "zh" if matches!(locale.culture.to_ascii_uppercase().as_str(), "TW" | "HK") => {
                CJK_TC
            }
            _ => CJK_SC,
        };
        let mut found: Vec<ID> = Vec::new();
        for name in preferred.iter().chain(CJK_SC).chain(SANS_SERIF) {
            let query = Query {
                families: &[Family::Name(name)],
                ..Query::default()
            };
            if let Some(id) = self.database.query(&query)
                && !found.contains(&id)
            {
                found.push(id);
            }
        }
        found
    }

    pub fn face_data(&self, id: ID) -> Option<Arc<FaceData>> {
        if let Ok(faces) = self.faces.lock()
            && let Some(cached) = faces.get(&id)
        {
            return cached.clone();
        }

        let loaded = self
            .database
            .with_face_data(id, |bytes, index| FaceData {
                bytes: bytes.to_vec(),
                index,
            })
            .filter(|data| data.face().is_some())
            .map(Arc::new);
        if loaded.is_none() {
            warn!(
                target = "engine::fonts",
                op = "fonts::load_face",
                result = "unreadable",
                "Failed to load font face data"
            );
        }

        if let Ok(mut faces) = self.faces.lock() {
            faces.insert(id, loaded.clone());
        }
        loaded
    }
}

const SANS_SERIF: &[&str] = &[
    "DejaVu Sans",
    "Liberation Sans",
    "Noto Sans",
    "Arial",
    "Helvetica",
];
const SERIF: &[&str] = &[
    "DejaVu Serif",
    "Liberation Serif",
    "Noto Serif",
    "Times New Roman",
];
const MONOSPACE: &[&str] = &[
    "DejaVu Sans Mono",
    "Liberation Mono",
    "Noto Sans Mono",
    "Courier New",
];
const CJK_SC: &[&str] = &[
    "Noto Sans CJK SC",
    "Noto Sans SC",
    "Source Han Sans SC",
    "Source Han Sans CN",
    "WenQuanYi Micro Hei",
    "WenQuanYi Zen Hei",
    "Microsoft YaHei",
    "PingFang SC",
    "Droid Sans Fallback",
];
const CJK_TC: &[&str] = &[
    "Noto Sans CJK TC",
    "Noto Sans TC",
    "Source Han Sans TC",
    "Microsoft JhengHei",
    "PingFang TC",
];
const CJK_JA: &[&str] = &[
    "Noto Sans CJK JP",
    "Noto Sans JP",
    "Source Han Sans JP",
    "Hiragino Sans",
    "Yu Gothic",
];
const CJK_KO: &[&str] = &[
    "Noto Sans CJK KR",
    "Noto Sans KR",
    "Source Han Sans KR",
    "Malgun Gothic",
];

/// A positioned glyph, in CSS pixels. `face == None` marks a character no
/// face could supply; it is painted as an ink bar when `ink` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedGlyph {
    pub face: Option<ID>,
    pub glyph: u16,
    pub advance: f32,
    pub ink: bool,
}

/// Per-render shaping state.
pub struct TextShaper<'a> {
    library: &'a FontLibrary,
    fallbacks: Vec<(ID, Arc<FaceData>)>,
}

impl<'a> TextShaper<'a> {
    pub fn new(library: &'a FontLibrary, locale: &Locale) -> Self {
        let fallbacks = library
            .fallbacks(locale)
            .into_iter()
            .filter_map(|id| library.face_data(id).map(|data| (id, data)))
            .collect();
        Self { library, fallbacks }
    }

    pub fn library(&self) -> &'a FontLibrary {
        self.library
    }

    pub fn shape(&self, text: &str, style: &ComputedStyle) -> Vec<ShapedGlyph> {
        let size = style.font_size;
        let primary = self
            .library
            .resolve(&style.font_families, style.bold, style.italic)
            .and_then(|id| self.library.face_data(id).map(|data| (id, data)));

        let mut faces: Vec<(ID, Face<'_>)> = Vec::new();
        if let Some((id, data)) = primary.as_ref()
            && let Some(face) = data.face()
        {
            faces.push((*id, face));
        }
        for (id, data) in &self.fallbacks {
            if let Some(face) = data.face() {
                faces.push((*id, face));
            }
        }

        text.chars()
            .map(|ch| {
                for (id, face) in &faces {
                    if let Some(glyph) = face.glyph_index(ch) {
                        let units = f32::from(face.units_per_em().max(1));
                        let advance = face
                            .glyph_hor_advance(glyph)
                            .map(|advance| f32::from(advance) * size / units)
                            .unwrap_or_else(|| fallback_advance(ch, size));
                        return ShapedGlyph {
                            face: Some(*id),
                            glyph: glyph.0,
                            advance,
                            ink: !ch.is_whitespace(),
                        };
                    }
                }
                ShapedGlyph {
                    face: None,
                    glyph: 0,
                    advance: fallback_advance(ch, size),
                    ink: !ch.is_whitespace(),
                }
            })
            .collect()
    }

    pub fn measure(&self, text: &str, style: &ComputedStyle) -> f32 {
        self.shape(text, style)
            .iter()
            .map(|glyph| glyph.advance)
            .sum()
    }
}

fn fallback_advance(ch: char, size: f32) -> f32 {
    if ch.is_whitespace() {
        size * 0.3
    } else if is_wide(ch) {
        size
    } else {
        size * 0.55
    }
}

/// East Asian wide characters, which may break anywhere.
pub fn is_wide(ch: char) -> bool {
    matches!(
        u32::from(ch),
        0x1100..=0x115F
            | 0x2E80..=0x303E
            | 0x3041..=0x33FF
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xA000..=0xA4CF
            | 0xAC00..=0xD7A3
            | 0xF900..=0xFAFF
            | 0xFE30..=0xFE4F
            | 0xFF00..=0xFF60
            | 0xFFE0..=0xFFE6
            | 0x20000..=0x3FFFD
    )
}

/// Append a glyph outline to `builder`, scaled to `size` and placed with its
/// origin at (`x`, `baseline`). Returns `false` when the glyph has no outline.
pub fn outline_glyph(
    face: &Face<'_>,
    glyph: u16,
    size: f32,
    x: f32,
    baseline: f32,
    builder: &mut tiny_skia::PathBuilder,
) -> bool {
    let scale = size / f32::from(face.units_per_em().max(1));
    let mut sink = OutlineSink {
        builder,
        scale,
        x,
        baseline,
    };
    face.outline_glyph(GlyphId(glyph), &mut sink).is_some()
}

struct OutlineSink<'a> {
    builder: &'a mut tiny_skia::PathBuilder,
    scale: f32,
    x: f32,
    baseline: f32,
}

impl OutlineSink<'_> {
    fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.x + x * self.scale, self.baseline - y * self.scale)
    }
}

impl ttf_parser::OutlineBuilder for OutlineSink<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x, y) = self.point(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x2, y2) = self.point(x2, y2);
        let (x, y) = self.point(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

pub(crate) fn log_library(library: &FontLibrary) {
    debug!(
        target = "engine::fonts",
        op = "fonts::library",
        faces = library.len(),
        "Using font library"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::job::RenderJob;

    #[test]
    fn wide_characters_are_detected() {
        assert!(is_wide('中'));
        assert!(is_wide('한'));
        assert!(is_wide('の'));
        assert!(!is_wide('a'));
        assert!(!is_wide('é'));
    }

    #[test]
    fn empty_library_shapes_with_fallback_advances() {
        let library = FontLibrary::new(Database::new());
        let shaper = TextShaper::new(&library, &Locale::default());
        let style = ComputedStyle::root(&RenderJob::new(""));

        let glyphs = shaper.shape("a 中", &style);
        assert_eq!(glyphs.len(), 3);
        assert!(glyphs.iter().all(|glyph| glyph.face.is_none()));
        assert!(glyphs[0].ink);
        assert!(!glyphs[1].ink);
        assert_eq!(glyphs[2].advance, style.font_size);
        assert!(library.resolve(&style.font_families, false, false).is_none());
    }
}
