//! Block and inline layout into a flat display list, in CSS pixels.

use std::{collections::HashMap, rc::Rc, sync::Arc};

use image::RgbaImage;
use tiny_skia::ColorU8;
use tracing::warn;

use super::{
    ResourceLoader,
    dom::{Element, Node},
    fonts::{ShapedGlyph, TextShaper, is_wide},
    job::RenderJob,
    style::{ComputedStyle, Display, Edges, ListStyle, StyleResolver},
};

const DEFAULT_PAGE_MARGIN: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub enum DisplayItem {
    Rect {
        bounds: Bounds,
        color: ColorU8,
    },
    Text {
        x: f32,
        baseline: f32,
        size: f32,
        color: ColorU8,
        glyphs: Vec<ShapedGlyph>,
    },
    Image {
        bounds: Bounds,
        image: Arc<RgbaImage>,
    },
}

/// Laid out document. Coordinates are CSS pixels; the painter scales them to
/// device pixels.
#[derive(Debug, Clone)]
pub struct Page {
    pub width: f32,
    pub height: f32,
    pub items: Vec<DisplayItem>,
}

pub fn layout(
    root: &Element,
    job: &RenderJob,
    loader: &dyn ResourceLoader,
    resolver: &StyleResolver,
    shaper: &TextShaper<'_>,
) -> Page {
    let mut engine = LayoutEngine {
        job,
        loader,
        resolver,
        shaper,
        items: Vec::new(),
        min_left: f32::MAX,
        max_right: 0.0,
        images: HashMap::new(),
    };

    let mut root_style = ComputedStyle::root(job);
    let mut has_body = false;
    root.walk(&mut |element| has_body |= element.tag == "body");
    if !has_body {
        root_style.padding = Edges {
            top: DEFAULT_PAGE_MARGIN,
            right: DEFAULT_PAGE_MARGIN,
            bottom: DEFAULT_PAGE_MARGIN,
            left: DEFAULT_PAGE_MARGIN,
        };
    }

    let width = job.max_width.max(1) as f32;
    let height = engine.block_box(root, &mut Vec::new(), &root_style, 0.0, 0.0, width, None);

    let page_width = if job.allow_refit && engine.max_right > 0.0 {
        let margin = engine.min_left.min(engine.max_right);
        (engine.max_right + margin).min(width)
    } else {
        width
    };

    Page {
        width: page_width.ceil().max(1.0),
        height: height.ceil().max(1.0),
        items: engine.items,
    }
}

enum InlineItem {
    Text {
        text: String,
        style: Rc<ComputedStyle>,
    },
    Break(Rc<ComputedStyle>),
    Image {
        image: Arc<RgbaImage>,
        width: f32,
        height: f32,
        style: Rc<ComputedStyle>,
    },
    Gap(f32, Rc<ComputedStyle>),
}

#[derive(Clone)]
enum AtomKind {
    Word(Vec<ShapedGlyph>),
    Space,
    Image(Arc<RgbaImage>, f32),
    Break,
}

#[derive(Clone)]
struct Atom {
    kind: AtomKind,
    width: f32,
    style: Rc<ComputedStyle>,
    breakable_before: bool,
}

struct Line {
    atoms: Vec<Atom>,
    width: f32,
}

struct LayoutEngine<'a> {
    job: &'a RenderJob,
    loader: &'a dyn ResourceLoader,
    resolver: &'a StyleResolver,
    shaper: &'a TextShaper<'a>,
    items: Vec<DisplayItem>,
    min_left: f32,
    max_right: f32,
    images: HashMap<String, Option<Arc<RgbaImage>>>,
}

impl<'a> LayoutEngine<'a> {
    /// Lay out `element` as a block whose border box starts at (`x`, `y`).
    /// Returns the border box height.
    #[allow(clippy::too_many_arguments)]
    fn block_box<'e>(
        &mut self,
        element: &'e Element,
        ancestors: &mut Vec<&'e Element>,
        style: &ComputedStyle,
        x: f32,
        y: f32,
        width: f32,
        marker: Option<String>,
    ) -> f32 {
        let background_slot = self.items.len();
        let border_top = style.border_top.map_or(0.0, |border| border.width);
        let border_bottom = style.border_bottom.map_or(0.0, |border| border.width);
        let border_left = style.border_left.map_or(0.0, |border| border.width);

        let inner_x = x + border_left + style.padding.left;
        let inner_y = y + border_top + style.padding.top;
        let inner_width = (width - border_left - style.padding.left - style.padding.right).max(1.0);

        if let Some(marker) = marker {
            self.marker(&marker, style, inner_x, inner_y);
        }
        let content_height = self.flow(element, ancestors, style, inner_x, inner_y, inner_width);
        let height =
            border_top + style.padding.top + content_height + style.padding.bottom + border_bottom;

        if let Some(color) = style.background {
            self.items.insert(
                background_slot,
                DisplayItem::Rect {
                    bounds: Bounds {
                        x,
                        y,
                        width,
                        height,
                    },
                    color,
                },
            );
        }
        let edges = [
            (style.border_top, Bounds { x, y, width, height: border_top }),
            (
                style.border_bottom,
                Bounds {
                    x,
                    y: y + height - border_bottom,
                    width,
                    height: border_bottom,
                },
            ),
            (style.border_left, Bounds { x, y, width: border_left, height }),
        ];
        for (border, bounds) in edges {
            if let Some(border) = border {
                self.items.push(DisplayItem::Rect {
                    bounds,
                    color: border.color,
                });
            }
        }
        height
    }

    /// Lay out the children of `element` inside the content box at (`x`, `y`).
    /// Returns the content height.
    fn flow<'e>(
        &mut self,
        element: &'e Element,
        ancestors: &mut Vec<&'e Element>,
        style: &ComputedStyle,
        x: f32,
        y: f32,
        width: f32,
    ) -> f32 {
        ancestors.push(element);
        let container = Rc::new(style.clone());
        let mut cursor = y;
        let mut pending_margin = 0.0_f32;
        let mut inline: Vec<InlineItem> = Vec::new();
        let mut list_index = 0_usize;

        for child in &element.children {
            let child = match child {
                Node::Text(text) => {
                    inline.push(InlineItem::Text {
                        text: text.clone(),
                        style: Rc::clone(&container),
                    });
                    continue;
                }
                Node::Element(child) => child,
            };

            let child_style = self.resolver.compute(child, ancestors, style, width);
            let is_block = matches!(child_style.display, Display::Block | Display::ListItem)
                && !matches!(child.tag.as_str(), "img" | "br");
            if child_style.display == Display::None {
                continue;
            }
            if !is_block {
                self.collect_inline(child, ancestors, child_style, width, &mut inline);
                continue;
            }

            let run_height =
                self.flush_inline(&mut inline, &container, x, cursor + pending_margin, width);
            if run_height > 0.0 {
                cursor += pending_margin + run_height;
                pending_margin = 0.0;
            }

            let marker = if child_style.display == Display::ListItem {
                list_index += 1;
                marker_text(child_style.list_style, list_index)
            } else {
                None
            };

            cursor += pending_margin.max(child_style.margin.top);
            let child_x = x + child_style.margin.left;
            let child_width = (width - child_style.margin.left - child_style.margin.right).max(1.0);
            cursor += self.block_box(
                child,
                ancestors,
                &child_style,
                child_x,
                cursor,
                child_width,
                marker,
            );
            pending_margin = child_style.margin.bottom.max(0.0);
        }

        let run_height = self.flush_inline(&mut inline, &container, x, cursor + pending_margin, width);
        if run_height > 0.0 {
            cursor += pending_margin + run_height;
            pending_margin = 0.0;
        }
        cursor += pending_margin;

        ancestors.pop();
        cursor - y
    }

    fn collect_inline<'e>(
        &mut self,
        element: &'e Element,
        ancestors: &mut Vec<&'e Element>,
        style: ComputedStyle,
        containing_width: f32,
        out: &mut Vec<InlineItem>,
    ) {
        let style = Rc::new(style);
        match element.tag.as_str() {
            "br" => {
                out.push(InlineItem::Break(style));
                return;
            }
            "img" => {
                if let Some(item) = self.image_item(element, containing_width, style) {
                    out.push(item);
                }
                return;
            }
            _ => {}
        }

        ancestors.push(element);
        for child in &element.children {
            match child {
                Node::Text(text) => out.push(InlineItem::Text {
                    text: text.clone(),
                    style: Rc::clone(&style),
                }),
                Node::Element(child) => {
                    let child_style = self.resolver.compute(child, ancestors, &style, containing_width);
                    if child_style.display != Display::None {
                        self.collect_inline(child, ancestors, child_style, containing_width, out);
                    }
                }
            }
        }
        ancestors.pop();

        if matches!(element.tag.as_str(), "td" | "th") {
            out.push(InlineItem::Gap(style.font_size, Rc::clone(&style)));
        }
    }

    fn image_item(
        &mut self,
        element: &Element,
        containing_width: f32,
        style: Rc<ComputedStyle>,
    ) -> Option<InlineItem> {
        let src = element.attr("src").map(str::trim).filter(|src| !src.is_empty())?;
        let image = self.load_image(src)?;
        let (natural_width, natural_height) = (image.width() as f32, image.height() as f32);
        if natural_width <= 0.0 || natural_height <= 0.0 {
            return None;
        }

        let attr = |name: &str| {
            element
                .attr(name)
                .and_then(|value| value.trim().trim_end_matches("px").parse::<f32>().ok())
                .filter(|value| *value > 0.0)
        };
        let (mut width, mut height) = match (attr("width"), attr("height")) {
            (Some(width), Some(height)) => (width, height),
            (Some(width), None) => (width, width * natural_height / natural_width),
            (None, Some(height)) => (height * natural_width / natural_height, height),
            (None, None) => (natural_width, natural_height),
        };
        if width > containing_width {
            height *= containing_width / width;
            width = containing_width;
        }

        Some(InlineItem::Image {
            image,
            width,
            height,
            style,
        })
    }

    fn load_image(&mut self, src: &str) -> Option<Arc<RgbaImage>> {
        let url = self.job.resolve(src);
        if let Some(cached) = self.images.get(&url) {
            return cached.clone();
        }

        let loaded = self
            .loader
            .load_image(&url)
            .and_then(|bytes| match image::load_from_memory(&bytes) {
                Ok(decoded) => Some(Arc::new(decoded.to_rgba8())),
                Err(err) => {
                    warn!(
                        target = "engine::layout",
                        op = "layout::image",
                        result = "decode_error",
                        url = %url,
                        error = %err,
                        "Failed to decode image; skipping"
                    );
                    None
                }
            });
        self.images.insert(url, loaded.clone());
        loaded
    }

    fn marker(&mut self, text: &str, style: &ComputedStyle, x: f32, y: f32) {
        let glyphs = self.shaper.shape(text, style);
        let width: f32 = glyphs.iter().map(|glyph| glyph.advance).sum();
        let (ascent, _) = text_metrics(style);
        self.items.push(DisplayItem::Text {
            x: x - width - style.font_size * 0.4,
            baseline: y + ascent,
            size: style.font_size,
            color: style.color,
            glyphs,
        });
    }

    /// Break the pending inline run into lines at (`x`, `y`) and emit them.
    /// Returns the height of the run.
    fn flush_inline(
        &mut self,
        items: &mut Vec<InlineItem>,
        container: &Rc<ComputedStyle>,
        x: f32,
        y: f32,
        width: f32,
    ) -> f32 {
        if items.is_empty() {
            return 0.0;
        }
        let atoms = self.atomize(items.drain(..));
        let lines = break_lines(atoms, width);

        let mut cursor = y;
        for line in lines {
            let (mut ascent, mut descent) = text_metrics(container);
            for atom in &line.atoms {
                let (atom_ascent, atom_descent) = match &atom.kind {
                    AtomKind::Image(_, height) => (*height, 0.0),
                    _ => text_metrics(&atom.style),
                };
                ascent = ascent.max(atom_ascent);
                descent = descent.max(atom_descent);
            }
            let baseline = cursor + ascent;

            let mut pen = x;
            for atom in line.atoms {
                match atom.kind {
                    AtomKind::Word(glyphs) if atom.style.color.alpha() > 0 => {
                        self.items.push(DisplayItem::Text {
                            x: pen,
                            baseline,
                            size: atom.style.font_size,
                            color: atom.style.color,
                            glyphs,
                        });
                    }
                    AtomKind::Image(image, height) => self.items.push(DisplayItem::Image {
                        bounds: Bounds {
                            x: pen,
                            y: baseline - height,
                            width: atom.width,
                            height,
                        },
                        image,
                    }),
                    _ => {}
                }
                pen += atom.width;
            }

            if line.width > 0.0 {
                self.min_left = self.min_left.min(x);
                self.max_right = self.max_right.max(x + line.width);
            }
            cursor += ascent + descent;
        }
        cursor - y
    }

    fn atomize(&self, items: impl Iterator<Item = InlineItem>) -> Vec<Atom> {
        let mut atomizer = Atomizer {
            shaper: self.shaper,
            atoms: Vec::new(),
            collapse_space: true,
            can_break: true,
        };
        for item in items {
            match item {
                InlineItem::Text { text, style } if style.preformatted => {
                    atomizer.preformatted(&text, &style)
                }
                InlineItem::Text { text, style } => atomizer.text(&text, &style),
                InlineItem::Break(style) => {
                    atomizer.atoms.push(Atom {
                        kind: AtomKind::Break,
                        width: 0.0,
                        style,
                        breakable_before: true,
                    });
                    atomizer.collapse_space = true;
                    atomizer.can_break = true;
                }
                InlineItem::Image {
                    image,
                    width,
                    height,
                    style,
                } => {
                    atomizer.atoms.push(Atom {
                        kind: AtomKind::Image(image, height),
                        width,
                        style,
                        breakable_before: true,
                    });
                    atomizer.collapse_space = false;
                    atomizer.can_break = true;
                }
                InlineItem::Gap(width, style) => {
                    atomizer.atoms.push(Atom {
                        kind: AtomKind::Space,
                        width,
                        style,
                        breakable_before: false,
                    });
                    atomizer.collapse_space = true;
                    atomizer.can_break = true;
                }
            }
        }
        atomizer.atoms
    }
}

struct Atomizer<'s, 'a> {
    shaper: &'s TextShaper<'a>,
    atoms: Vec<Atom>,
    /// Whitespace seen now collapses into a preceding space (or line start).
    collapse_space: bool,
    /// A line may break before the next word.
    can_break: bool,
}

impl Atomizer<'_, '_> {
    fn text(&mut self, text: &str, style: &Rc<ComputedStyle>) {
        let mut word = String::new();
        for ch in text.chars() {
            if ch.is_whitespace() && ch != '\u{a0}' {
                self.word(&mut word, style);
                if !self.collapse_space {
                    let glyphs = self.shaper.shape(" ", style);
                    let width = glyphs.iter().map(|glyph| glyph.advance).sum();
                    self.atoms.push(Atom {
                        kind: AtomKind::Space,
                        width,
                        style: Rc::clone(style),
                        breakable_before: false,
                    });
                }
                self.collapse_space = true;
                self.can_break = true;
            } else if is_wide(ch) {
                self.word(&mut word, style);
                let mut wide = String::new();
                wide.push(ch);
                self.can_break = true;
                self.word(&mut wide, style);
                self.can_break = true;
            } else {
                word.push(ch);
            }
        }
        self.word(&mut word, style);
    }

    fn preformatted(&mut self, text: &str, style: &Rc<ComputedStyle>) {
        for (index, line) in text.split('\n').enumerate() {
            if index > 0 {
                self.atoms.push(Atom {
                    kind: AtomKind::Break,
                    width: 0.0,
                    style: Rc::clone(style),
                    breakable_before: true,
                });
            }
            let mut line = line.replace('\t', "    ");
            self.can_break = false;
            self.word(&mut line, style);
        }
        self.collapse_space = false;
        self.can_break = false;
    }

    fn word(&mut self, word: &mut String, style: &Rc<ComputedStyle>) {
        if word.is_empty() {
            return;
        }
        let glyphs = self.shaper.shape(word, style);
        let width = glyphs.iter().map(|glyph| glyph.advance).sum();
        self.atoms.push(Atom {
            kind: AtomKind::Word(glyphs),
            width,
            style: Rc::clone(style),
            breakable_before: self.can_break,
        });
        word.clear();
        self.collapse_space = false;
        self.can_break = false;
    }
}

fn break_lines(atoms: Vec<Atom>, width: f32) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut current = Line {
        atoms: Vec::new(),
        width: 0.0,
    };

    for atom in atoms.into_iter().flat_map(|atom| split_oversized(atom, width)) {
        match atom.kind {
            AtomKind::Break => {
                finish_line(&mut lines, &mut current, true);
                continue;
            }
            AtomKind::Space if current.atoms.is_empty() => continue,
            _ => {}
        }
        if !current.atoms.is_empty()
            && atom.breakable_before
            && current.width + atom.width > width
        {
            finish_line(&mut lines, &mut current, false);
            if matches!(atom.kind, AtomKind::Space) {
                continue;
            }
        }
        current.width += atom.width;
        current.atoms.push(atom);
    }
    finish_line(&mut lines, &mut current, false);
    lines
}

fn finish_line(lines: &mut Vec<Line>, current: &mut Line, forced: bool) {
    while current
        .atoms
        .last()
        .is_some_and(|atom| matches!(atom.kind, AtomKind::Space))
    {
        if let Some(space) = current.atoms.pop() {
            current.width -= space.width;
        }
    }
    if current.atoms.is_empty() && !forced {
        return;
    }
    lines.push(std::mem::replace(
        current,
        Line {
            atoms: Vec::new(),
            width: 0.0,
        },
    ));
}

/// Split a word wider than the line into pieces that fit, unless it is
/// preformatted.
fn split_oversized(atom: Atom, width: f32) -> Vec<Atom> {
    let glyphs = match &atom.kind {
        AtomKind::Word(glyphs) if atom.width > width && !atom.style.preformatted => glyphs,
        _ => return vec![atom],
    };

    let mut pieces = Vec::new();
    let mut chunk: Vec<ShapedGlyph> = Vec::new();
    let mut chunk_width = 0.0;
    for glyph in glyphs {
        if !chunk.is_empty() && chunk_width + glyph.advance > width {
            pieces.push(std::mem::take(&mut chunk));
            chunk_width = 0.0;
        }
        chunk_width += glyph.advance;
        chunk.push(*glyph);
    }
    if !chunk.is_empty() {
        pieces.push(chunk);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, glyphs)| Atom {
            width: glyphs.iter().map(|glyph| glyph.advance).sum(),
            kind: AtomKind::Word(glyphs),
            style: Rc::clone(&atom.style),
            breakable_before: index > 0 || atom.breakable_before,
        })
        .collect()
}

/// Ascent and descent of a line box for `style`, leading split evenly.
fn text_metrics(style: &ComputedStyle) -> (f32, f32) {
    let size = style.font_size;
    let line_height = size * style.line_height.max(0.5);
    let ascent = (line_height - size) / 2.0 + size * 0.8;
    (ascent, line_height - ascent)
}

fn marker_text(list_style: ListStyle, index: usize) -> Option<String> {
    match list_style {
        ListStyle::Disc => Some("•".to_owned()),
        ListStyle::Circle => Some("◦".to_owned()),
        ListStyle::Square => Some("▪".to_owned()),
        ListStyle::Decimal => Some(format!("{index}.")),
        ListStyle::None => None,
    }
}
