//! A small CSS subset: parsing, stylesheet gathering and the cascade.
//!
//! Selectors are compound type/class/id selectors joined by descendant (or
//! child, treated as descendant) combinators. Selectors using pseudo-classes,
//! attribute tests or sibling combinators never match. At-rules other than
//! `@import` are skipped together with their blocks.

use std::collections::HashSet;

use tiny_skia::ColorU8;
use tracing::debug;

use super::{ResourceLoader, dom::Element, job::RenderJob};

const MAX_IMPORT_DEPTH: usize = 4;

const USER_AGENT_CSS: &str = r#"
html, body, div, p, h1, h2, h3, h4, h5, h6, ul, ol, dl, dt, dd, pre, blockquote,
hr, table, thead, tbody, tfoot, tr, section, article, header, footer, main, nav,
aside, figure, figcaption, details, summary, address, center, form, fieldset { display: block }
li { display: list-item }
head, script, style, title, meta, link, template, noscript { display: none }
body { margin: 8px }
p, dl, figure { margin-top: 1em; margin-bottom: 1em }
blockquote { margin: 1em 40px }
ul, ol { margin-top: 1em; margin-bottom: 1em; padding-left: 40px }
ul { list-style-type: disc }
ol { list-style-type: decimal }
li ul, li ol { margin-top: 0; margin-bottom: 0 }
dd { margin-left: 40px }
h1 { font-size: 2em; margin-top: .67em; margin-bottom: .67em; font-weight: bold }
h2 { font-size: 1.5em; margin-top: .83em; margin-bottom: .83em; font-weight: bold }
h3 { font-size: 1.17em; margin-top: 1em; margin-bottom: 1em; font-weight: bold }
h4 { margin-top: 1.33em; margin-bottom: 1.33em; font-weight: bold }
h5 { font-size: .83em; margin-top: 1.67em; margin-bottom: 1.67em; font-weight: bold }
h6 { font-size: .67em; margin-top: 2.33em; margin-bottom: 2.33em; font-weight: bold }
b, strong, th, dt { font-weight: bold }
i, em, cite, var { font-style: italic }
pre, code, kbd, samp, tt { font-family: monospace }
pre { white-space: pre; margin-top: 1em; margin-bottom: 1em }
hr { border-top: 1px solid #888888; margin-top: .5em; margin-bottom: .5em }
a { color: #0000ee }
small { font-size: .83em }
big { font-size: 1.17em }
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Block,
    Inline,
    ListItem,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStyle {
    Disc,
    Circle,
    Square,
    Decimal,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Edges {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Border {
    pub width: f32,
    pub color: ColorU8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStyle {
    pub display: Display,
    pub color: ColorU8,
    pub background: Option<ColorU8>,
    /// CSS pixels.
    pub font_size: f32,
    pub font_families: Vec<String>,
    pub bold: bool,
    pub italic: bool,
    /// Multiple of the font size.
    pub line_height: f32,
    pub preformatted: bool,
    pub list_style: ListStyle,
    pub margin: Edges,
    pub padding: Edges,
    pub border_top: Option<Border>,
    pub border_bottom: Option<Border>,
    pub border_left: Option<Border>,
}

impl ComputedStyle {
    pub fn root(job: &RenderJob) -> Self {
        Self {
            display: Display::Block,
            color: ColorU8::from_rgba(0, 0, 0, 255),
            background: None,
            font_size: job.root_font_px(),
            font_families: vec![job.font_name.clone()],
            bold: false,
            italic: false,
            line_height: 1.3,
            preformatted: false,
            list_style: ListStyle::Disc,
            margin: Edges::default(),
            padding: Edges::default(),
            border_top: None,
            border_bottom: None,
            border_left: None,
        }
    }

    /// Inherited properties carried over, everything else at its initial value.
    fn inherit(&self) -> Self {
        Self {
            display: Display::Inline,
            background: None,
            margin: Edges::default(),
            padding: Edges::default(),
            border_top: None,
            border_bottom: None,
            border_left: None,
            ..self.clone()
        }
    }

    pub fn is_monospace(&self) -> bool {
        self.font_families
            .first()
            .is_some_and(|family| family.eq_ignore_ascii_case("monospace"))
    }
}

/// Lengths needed to resolve relative units.
#[derive(Debug, Clone, Copy)]
pub struct LengthContext {
    pub font_size: f32,
    pub root_font_size: f32,
    pub viewport_width: f32,
    pub viewport_height: f32,
    pub percent_base: f32,
}

pub fn parse_length(value: &str, ctx: &LengthContext) -> Option<f32> {
    let value = value.trim().to_ascii_lowercase();
    if value == "0" || value == "auto" {
        return Some(0.0);
    }
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f32 = number.parse().ok()?;
    let px = match unit {
        "px" | "" => number,
        "pt" => number * 96.0 / 72.0,
        "pc" => number * 16.0,
        "in" => number * 96.0,
        "cm" => number * 96.0 / 2.54,
        "mm" => number * 96.0 / 25.4,
        "em" => number * ctx.font_size,
        "rem" => number * ctx.root_font_size,
        "ex" | "ch" => number * ctx.font_size * 0.5,
        "%" => number * ctx.percent_base / 100.0,
        "vh" => number * ctx.viewport_height / 100.0,
        "vw" => number * ctx.viewport_width / 100.0,
        _ => return None,
    };
    Some(px)
}

pub fn parse_color(value: &str) -> Option<ColorU8> {
    let value = value.trim().to_ascii_lowercase();
    if let Some(hex) = value.strip_prefix('#') {
        return parse_hex_color(hex);
    }
    if let Some(args) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<&str> = args
            .split([',', ' ', '/'])
            .filter(|part| !part.is_empty())
            .collect();
        if parts.len() < 3 {
            return None;
        }
        let channel = |part: &str| -> Option<u8> {
            match part.strip_suffix('%') {
                Some(pct) => pct.parse::<f32>().ok().map(|p| (p * 2.55).round() as u8),
                None => part.parse::<f32>().ok().map(|v| v.clamp(0.0, 255.0) as u8),
            }
        };
        let alpha = match parts.get(3) {
            Some(part) => match part.strip_suffix('%') {
                Some(pct) => pct.parse::<f32>().ok()? / 100.0,
                None => part.parse::<f32>().ok()?,
            },
            None => 1.0,
        };
        return Some(ColorU8::from_rgba(
            channel(parts[0])?,
            channel(parts[1])?,
            channel(parts[2])?,
            (alpha.clamp(0.0, 1.0) * 255.0).round() as u8,
        ));
    }
    let (r, g, b) = match value.as_str() {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "lime" => (0, 255, 0),
        "blue" => (0, 0, 255),
        "navy" => (0, 0, 128),
        "gray" | "grey" => (128, 128, 128),
        "silver" => (192, 192, 192),
        "maroon" => (128, 0, 0),
        "purple" => (128, 0, 128),
        "teal" => (0, 128, 128),
        "olive" => (128, 128, 0),
        "orange" => (255, 165, 0),
        "yellow" => (255, 255, 0),
        "aqua" | "cyan" => (0, 255, 255),
        "fuchsia" | "magenta" => (255, 0, 255),
        "transparent" => return Some(ColorU8::from_rgba(0, 0, 0, 0)),
        _ => return None,
    };
    Some(ColorU8::from_rgba(r, g, b, 255))
}

fn parse_hex_color(hex: &str) -> Option<ColorU8> {
    let digit = |index: usize| u8::from_str_radix(hex.get(index..index + 1)?, 16).ok();
    let pair = |index: usize| u8::from_str_radix(hex.get(index..index + 2)?, 16).ok();
    match hex.len() {
        3 | 4 => {
            let alpha = if hex.len() == 4 { digit(3)? * 17 } else { 255 };
            Some(ColorU8::from_rgba(
                digit(0)? * 17,
                digit(1)? * 17,
                digit(2)? * 17,
                alpha,
            ))
        }
        6 | 8 => {
            let alpha = if hex.len() == 8 { pair(6)? } else { 255 };
            Some(ColorU8::from_rgba(pair(0)?, pair(2)?, pair(4)?, alpha))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl Compound {
    fn parse(text: &str) -> Option<Self> {
        let mut compound = Compound::default();
        let mut rest = text;
        let ident_end = |s: &str| s.find(['.', '#']).unwrap_or(s.len());

        let end = ident_end(rest);
        let tag = &rest[..end];
        if !tag.is_empty() && tag != "*" {
            if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return None;
            }
            compound.tag = Some(tag.to_ascii_lowercase());
        }
        rest = &rest[end..];

        while let Some(marker) = rest.chars().next() {
            let body = &rest[1..];
            let end = ident_end(body);
            let name = &body[..end];
            if name.is_empty() {
                return None;
            }
            match marker {
                '.' => compound.classes.push(name.to_owned()),
                '#' => compound.id = Some(name.to_owned()),
                _ => return None,
            }
            rest = &body[end..];
        }
        Some(compound)
    }

    fn matches(&self, element: &Element) -> bool {
        if self.tag.as_deref().is_some_and(|tag| tag != element.tag) {
            return false;
        }
        if self.id.as_deref().is_some_and(|id| Some(id) != element.id()) {
            return false;
        }
        self.classes
            .iter()
            .all(|class| element.classes().any(|candidate| candidate == class))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Selector {
    compounds: Vec<Compound>,
    specificity: (u32, u32, u32),
}

impl Selector {
    fn parse(text: &str) -> Option<Self> {
        if text.contains([':', '[', '+', '~']) {
            return None;
        }
        let compounds = text
            .replace('>', " ")
            .split_whitespace()
            .map(Compound::parse)
            .collect::<Option<Vec<_>>>()?;
        if compounds.is_empty() {
            return None;
        }
        let specificity = compounds.iter().fold((0, 0, 0), |(a, b, c), compound| {
            (
                a + u32::from(compound.id.is_some()),
                b + compound.classes.len() as u32,
                c + u32::from(compound.tag.is_some()),
            )
        });
        Some(Self {
            compounds,
            specificity,
        })
    }

    /// `ancestors` is ordered from the root down to the parent.
    fn matches(&self, element: &Element, ancestors: &[&Element]) -> bool {
        let Some((subject, rest)) = self.compounds.split_last() else {
            return false;
        };
        if !subject.matches(element) {
            return false;
        }
        let mut remaining = ancestors.len();
        for compound in rest.iter().rev() {
            match ancestors[..remaining]
                .iter()
                .rposition(|ancestor| compound.matches(ancestor))
            {
                Some(found) => remaining = found,
                None => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    selectors: Vec<Selector>,
    declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stylesheet {
    rules: Vec<Rule>,
}

impl Stylesheet {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A parsed sheet plus the targets of its `@import` rules, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSheet {
    pub imports: Vec<String>,
    pub sheet: Stylesheet,
}

pub fn parse_stylesheet(css: &str) -> ParsedSheet {
    let css = strip_comments(css);
    let mut parsed = ParsedSheet::default();
    let mut rest = css.as_str();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        if let Some(at_rule) = rest.strip_prefix('@') {
            let name_end = at_rule
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                .unwrap_or(at_rule.len());
            let name = at_rule[..name_end].to_ascii_lowercase();
            let semicolon = at_rule.find(';');
            let brace = at_rule.find('{');
            match (semicolon, brace) {
                (Some(end), brace) if brace.is_none_or(|brace| end < brace) => {
                    if name == "import"
                        && let Some(target) = import_target(&at_rule[name_end..end])
                    {
                        parsed.imports.push(target);
                    }
                    rest = &at_rule[end + 1..];
                }
                (_, Some(open)) => {
                    rest = skip_block(&at_rule[open..]);
                }
                _ => break,
            }
            continue;
        }

        let Some(open) = rest.find('{') else {
            break;
        };
        let selector_text = &rest[..open];
        let after_open = &rest[open + 1..];
        let close = after_open.find('}').unwrap_or(after_open.len());
        let body = &after_open[..close];
        rest = after_open.get(close + 1..).unwrap_or_default();

        let selectors: Vec<Selector> = selector_text
            .split(',')
            .filter_map(|text| Selector::parse(text.trim()))
            .collect();
        if selectors.is_empty() {
            continue;
        }
        let declarations = parse_declarations(body);
        if !declarations.is_empty() {
            parsed.sheet.rules.push(Rule {
                selectors,
                declarations,
            });
        }
    }

    parsed
}

/// Parse a declaration block body (`a: b; c: d`).
pub fn parse_declarations(body: &str) -> Vec<Declaration> {
    split_outside_parens(body, ';')
        .into_iter()
        .filter_map(|declaration| {
            let (name, value) = declaration.split_once(':')?;
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            let value = value
                .strip_suffix("!important")
                .map(str::trim_end)
                .unwrap_or(value);
            if name.is_empty() || value.is_empty() {
                return None;
            }
            Some(Declaration {
                name,
                value: value.to_owned(),
            })
        })
        .collect()
}

fn split_outside_parens(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut start = 0;
    for (index, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            c if c == separator && depth <= 0 => {
                parts.push(&text[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn skip_block(from_open: &str) -> &str {
    let mut depth = 0_i32;
    for (index, ch) in from_open.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return &from_open[index + 1..];
                }
            }
            _ => {}
        }
    }
    ""
}

fn import_target(prelude: &str) -> Option<String> {
    let prelude = prelude.trim();
    let quoted = |text: &str| -> Option<String> {
        let quote = text.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let inner = &text[1..];
        inner.find(quote).map(|end| inner[..end].to_owned())
    };
    if let Some(inner) = prelude.strip_prefix("url(") {
        let end = inner.find(')')?;
        let target = inner[..end].trim();
        return quoted(target).or_else(|| Some(target.to_owned()));
    }
    quoted(prelude)
}

/// Gather every stylesheet the document references, in cascade order:
/// `<style>` blocks and `<link rel="stylesheet">` targets in document order,
/// each preceded by the sheets it imports.
pub fn collect_stylesheets(
    root: &Element,
    job: &RenderJob,
    loader: &dyn ResourceLoader,
) -> Vec<Stylesheet> {
    let mut gatherer = Gatherer {
        job,
        loader,
        seen: HashSet::new(),
        sheets: Vec::new(),
    };

    let mut sources = Vec::new();
    root.walk(&mut |element| match element.tag.as_str() {
        "style" => sources.push(Source::Inline(element.text_content())),
        "link" => {
            let is_stylesheet = element.attr("rel").is_some_and(|rel| {
                rel.split_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            });
            if is_stylesheet && let Some(href) = element.attr("href") {
                sources.push(Source::Linked(job.resolve(href)));
            }
        }
        _ => {}
    });

    for source in sources {
        match source {
            Source::Inline(css) => gatherer.add(&css, &job.base_url, 0),
            Source::Linked(url) => gatherer.fetch(url, 1),
        }
    }
    gatherer.sheets
}

enum Source {
    Inline(String),
    Linked(String),
}

struct Gatherer<'a> {
    job: &'a RenderJob,
    loader: &'a dyn ResourceLoader,
    seen: HashSet<String>,
    sheets: Vec<Stylesheet>,
}

impl Gatherer<'_> {
    fn fetch(&mut self, url: String, depth: usize) {
        if !self.seen.insert(url.clone()) {
            return;
        }
        match self.loader.load_stylesheet(&url) {
            Some(css) => self.add(&css, &url, depth),
            None => debug!(
                target = "engine::style",
                op = "style::fetch",
                result = "not_found",
                url = %url,
                "Stylesheet not found; skipping"
            ),
        }
    }

    fn add(&mut self, css: &str, base: &str, depth: usize) {
        let parsed = parse_stylesheet(css);
        if depth < MAX_IMPORT_DEPTH {
            for import in &parsed.imports {
                let url = self.job.url_join.join(base, import);
                self.fetch(url, depth + 1);
            }
        }
        self.sheets.push(parsed.sheet);
    }
}

/// Resolves computed styles against the user-agent sheet plus the document's
/// sheets.
pub struct StyleResolver {
    rules: Vec<Rule>,
    root_font_size: f32,
    viewport_width: f32,
    viewport_height: f32,
}

impl StyleResolver {
    pub fn new(sheets: Vec<Stylesheet>, job: &RenderJob) -> Self {
        let mut rules = parse_stylesheet(USER_AGENT_CSS).sheet.rules;
        rules.extend(sheets.into_iter().flat_map(|sheet| sheet.rules));
        Self {
            rules,
            root_font_size: job.root_font_px(),
            viewport_width: job.max_width as f32,
            viewport_height: job.device_height as f32,
        }
    }

    /// Compute the style of `element`. `containing_width` is the width
    /// percentages resolve against.
    pub fn compute(
        &self,
        element: &Element,
        ancestors: &[&Element],
        parent: &ComputedStyle,
        containing_width: f32,
    ) -> ComputedStyle {
        let mut matched: Vec<((u32, u32, u32), usize, &Declaration)> = Vec::new();
        for (order, rule) in self.rules.iter().enumerate() {
            let specificity = rule
                .selectors
                .iter()
                .filter(|selector| selector.matches(element, ancestors))
                .map(|selector| selector.specificity)
                .max();
            if let Some(specificity) = specificity {
                matched.extend(
                    rule.declarations
                        .iter()
                        .map(|declaration| (specificity, order, declaration)),
                );
            }
        }
        matched.sort_by_key(|(specificity, order, _)| (*specificity, *order));

        let inline = element.attr("style").map(parse_declarations).unwrap_or_default();
        let declarations: Vec<&Declaration> = matched
            .into_iter()
            .map(|(_, _, declaration)| declaration)
            .chain(inline.iter())
            .collect();

        let mut style = parent.inherit();
        let parent_ctx = self.context(parent.font_size, parent.font_size);
        if let Some(size) = declarations
            .iter()
            .rev()
            .find(|declaration| declaration.name == "font-size")
            .and_then(|declaration| font_size(&declaration.value, &parent_ctx))
        {
            style.font_size = size;
        }

        let ctx = self.context(style.font_size, containing_width);
        for declaration in declarations {
            apply(&mut style, declaration, &ctx);
        }
        style
    }

    fn context(&self, font_size: f32, percent_base: f32) -> LengthContext {
        LengthContext {
            font_size,
            root_font_size: self.root_font_size,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            percent_base,
        }
    }
}

fn font_size(value: &str, parent: &LengthContext) -> Option<f32> {
    let keyword = match value.trim().to_ascii_lowercase().as_str() {
        "xx-small" => Some(0.6),
        "x-small" => Some(0.75),
        "small" => Some(0.89),
        "medium" => Some(1.0),
        "large" => Some(1.2),
        "x-large" => Some(1.5),
        "xx-large" => Some(2.0),
        "smaller" => return Some(parent.font_size / 1.2),
        "larger" => return Some(parent.font_size * 1.2),
        _ => None,
    };
    match keyword {
        Some(factor) => Some(parent.root_font_size * factor),
        None => parse_length(value, parent).filter(|size| *size > 0.0),
    }
}

fn apply(style: &mut ComputedStyle, declaration: &Declaration, ctx: &LengthContext) {
    let value = declaration.value.as_str();
    match declaration.name.as_str() {
        "display" => {
            style.display = match value.to_ascii_lowercase().as_str() {
                "none" => Display::None,
                "list-item" => Display::ListItem,
                "inline" | "inline-block" | "inline-flex" | "contents" => Display::Inline,
                _ => Display::Block,
            }
        }
        "color" => {
            if let Some(color) = parse_color(value) {
                style.color = color;
            }
        }
        "background-color" | "background" => {
            style.background = value
                .split_whitespace()
                .find_map(parse_color)
                .filter(|color| color.alpha() > 0);
        }
        "font-family" => {
            let families: Vec<String> = value
                .split(',')
                .map(|family| family.trim().trim_matches(['"', '\'']).to_owned())
                .filter(|family| !family.is_empty())
                .collect();
            if !families.is_empty() {
                style.font_families = families;
            }
        }
        "font-weight" => {
            style.bold = match value.to_ascii_lowercase().as_str() {
                "bold" | "bolder" => true,
                "normal" | "lighter" => false,
                numeric => numeric.parse::<u16>().map(|w| w >= 600).unwrap_or(style.bold),
            }
        }
        "font-style" => style.italic = !value.eq_ignore_ascii_case("normal"),
        "line-height" => {
            let value = value.trim();
            if value.eq_ignore_ascii_case("normal") {
                style.line_height = 1.3;
            } else if let Ok(factor) = value.parse::<f32>() {
                style.line_height = factor;
            } else if let Some(px) = parse_length(value, ctx).filter(|px| *px > 0.0) {
                style.line_height = px / style.font_size;
            }
        }
        "white-space" => {
            style.preformatted = matches!(
                value.to_ascii_lowercase().as_str(),
                "pre" | "pre-wrap" | "break-spaces"
            )
        }
        "list-style-type" | "list-style" => {
            for token in value.split_whitespace() {
                let kind = match token.to_ascii_lowercase().as_str() {
                    "disc" => ListStyle::Disc,
                    "circle" => ListStyle::Circle,
                    "square" => ListStyle::Square,
                    "decimal" | "decimal-leading-zero" | "lower-alpha" | "upper-alpha"
                    | "lower-roman" | "upper-roman" => ListStyle::Decimal,
                    "none" => ListStyle::None,
                    _ => continue,
                };
                style.list_style = kind;
            }
        }
        "margin" => {
            if let Some(edges) = parse_edges(value, ctx) {
                style.margin = edges;
            }
        }
        "padding" => {
            if let Some(edges) = parse_edges(value, ctx) {
                style.padding = edges;
            }
        }
        "margin-top" => set_length(&mut style.margin.top, value, ctx),
        "margin-right" => set_length(&mut style.margin.right, value, ctx),
        "margin-bottom" => set_length(&mut style.margin.bottom, value, ctx),
        "margin-left" => set_length(&mut style.margin.left, value, ctx),
        "padding-top" => set_length(&mut style.padding.top, value, ctx),
        "padding-right" => set_length(&mut style.padding.right, value, ctx),
        "padding-bottom" => set_length(&mut style.padding.bottom, value, ctx),
        "padding-left" => set_length(&mut style.padding.left, value, ctx),
        "border" => {
            let border = parse_border(value, ctx);
            style.border_top = border;
            style.border_bottom = border;
            style.border_left = border;
        }
        "border-top" => style.border_top = parse_border(value, ctx),
        "border-bottom" => style.border_bottom = parse_border(value, ctx),
        "border-left" => style.border_left = parse_border(value, ctx),
        _ => {}
    }
}

fn set_length(slot: &mut f32, value: &str, ctx: &LengthContext) {
    if let Some(px) = parse_length(value, ctx) {
        *slot = px;
    }
}

fn parse_edges(value: &str, ctx: &LengthContext) -> Option<Edges> {
    let values = value
        .split_whitespace()
        .map(|part| parse_length(part, ctx))
        .collect::<Option<Vec<f32>>>()?;
    let edges = match values.as_slice() {
        [all] => (*all, *all, *all, *all),
        [vertical, horizontal] => (*vertical, *horizontal, *vertical, *horizontal),
        [top, horizontal, bottom] => (*top, *horizontal, *bottom, *horizontal),
        [top, right, bottom, left] => (*top, *right, *bottom, *left),
        _ => return None,
    };
    Some(Edges {
        top: edges.0,
        right: edges.1,
        bottom: edges.2,
        left: edges.3,
    })
}

fn parse_border(value: &str, ctx: &LengthContext) -> Option<Border> {
    let mut width = None;
    let mut color = None;
    let mut visible = true;
    for token in split_outside_parens(value, ' ') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.to_ascii_lowercase().as_str() {
            "none" | "hidden" => visible = false,
            "solid" | "dashed" | "dotted" | "double" | "groove" | "ridge" | "inset"
            | "outset" => {}
            "thin" => width = Some(1.0),
            "medium" => width = Some(3.0),
            "thick" => width = Some(5.0),
            _ => {
                if let Some(px) = parse_length(token, ctx) {
                    width = Some(px);
                } else if let Some(parsed) = parse_color(token) {
                    color = Some(parsed);
                }
            }
        }
    }
    let width = width.unwrap_or(3.0);
    (visible && width > 0.0).then(|| Border {
        width,
        color: color.unwrap_or(ColorU8::from_rgba(0, 0, 0, 255)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dom;

    fn ctx() -> LengthContext {
        LengthContext {
            font_size: 20.0,
            root_font_size: 16.0,
            viewport_width: 800.0,
            viewport_height: 600.0,
            percent_base: 400.0,
        }
    }

    #[test]
    fn lengths_resolve_relative_units() {
        let ctx = ctx();
        assert_eq!(parse_length("12px", &ctx), Some(12.0));
        assert_eq!(parse_length("1.5em", &ctx), Some(30.0));
        assert_eq!(parse_length("2rem", &ctx), Some(32.0));
        assert_eq!(parse_length("50%", &ctx), Some(200.0));
        assert_eq!(parse_length("10vh", &ctx), Some(60.0));
        assert_eq!(parse_length("12pt", &ctx), Some(16.0));
        assert_eq!(parse_length("wide", &ctx), None);
    }

    #[test]
    fn colors_parse_in_common_notations() {
        assert_eq!(parse_color("#fff"), Some(ColorU8::from_rgba(255, 255, 255, 255)));
        assert_eq!(parse_color("#24292f"), Some(ColorU8::from_rgba(0x24, 0x29, 0x2f, 255)));
        assert_eq!(
            parse_color("rgba(10, 20, 30, 0.5)"),
            Some(ColorU8::from_rgba(10, 20, 30, 128))
        );
        assert_eq!(parse_color("Navy"), Some(ColorU8::from_rgba(0, 0, 128, 255)));
        assert_eq!(parse_color("var(--x)"), None);
    }

    #[test]
    fn parser_collects_imports_and_skips_at_blocks() {
        let parsed = parse_stylesheet(
            r#"@charset "utf-8";
            @import url("base.css");
            @import 'theme.css' screen;
            /* p { color: red } */
            @media (prefers-color-scheme: dark) { p { color: white } }
            p, .note { color: #333; margin: 0 !important }
            a:hover { color: red }"#,
        );
        assert_eq!(parsed.imports, vec!["base.css", "theme.css"]);
        assert_eq!(parsed.sheet.len(), 1);
    }

    #[test]
    fn cascade_orders_by_specificity_then_source() {
        let root = dom::parse(
            r#"<div class="box"><p id="lead" class="note" style="font-size: 2em">x</p></div>"#,
        )
        .expect("parse");
        let sheet = parse_stylesheet(
            "#lead { color: #00ff00 } p.note { color: #ff0000 } .box p { font-weight: bold }",
        )
        .sheet;
        let job = RenderJob::new("");
        let resolver = StyleResolver::new(vec![sheet], &job);
        let root_style = ComputedStyle::root(&job);

        let mut elements = Vec::new();
        root.walk(&mut |element| elements.push(element));
        let (div, p) = (elements[0], elements[1]);
        let div_style = resolver.compute(div, &[&root], &root_style, 800.0);
        let p_style = resolver.compute(p, &[&root, div], &div_style, 800.0);

        assert_eq!(div_style.display, Display::Block);
        assert_eq!(p_style.color, ColorU8::from_rgba(0, 255, 0, 255));
        assert!(p_style.bold);
        assert_eq!(p_style.font_size, 32.0);
        assert_eq!(p_style.margin.top, 32.0);
    }

    #[test]
    fn unsupported_selectors_never_match() {
        assert!(Selector::parse("a:hover").is_none());
        assert!(Selector::parse("input[type=text]").is_none());
        assert!(Selector::parse("h1 + p").is_none());
        assert!(Selector::parse("ul > li").is_some());
    }
}
