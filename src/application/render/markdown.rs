//! Markdown to HTML conversion with class-based code highlighting.

use comrak::{
    Arena, format_html,
    nodes::{AstNode, NodeHtmlBlock, NodeValue},
    options::Options,
    parse_document,
};
use once_cell::sync::Lazy;
use syntect::{
    highlighting::ThemeSet,
    html::{ClassStyle, ClassedHTMLGenerator, css_for_theme_with_class_style},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};
use tracing::{debug, warn};

use super::types::RenderError;

const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "syntax-" };
const HIGHLIGHT_THEME: &str = "InspiredGitHub";

/// Converted document plus what the conversion ran into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownHtml {
    pub html: String,
    pub contains_code: bool,
    pub contains_math: bool,
}

pub struct MarkdownRenderer {
    options: Options<'static>,
    syntax_set: SyntaxSet,
    highlight_css: String,
}

static MARKDOWN_RENDERER: Lazy<MarkdownRenderer> = Lazy::new(MarkdownRenderer::new);

pub fn markdown_renderer() -> &'static MarkdownRenderer {
    &MARKDOWN_RENDERER
}

impl MarkdownRenderer {
    fn new() -> Self {
        let themes = ThemeSet::load_defaults();
        let highlight_css = themes
            .themes
            .get(HIGHLIGHT_THEME)
            .and_then(|theme| match css_for_theme_with_class_style(theme, CLASS_STYLE) {
                Ok(css) => Some(css),
                Err(err) => {
                    warn!(
                        target = "application::render::markdown",
                        op = "markdown::highlight_css",
                        theme = HIGHLIGHT_THEME,
                        error = %err,
                        "Highlight stylesheet unavailable"
                    );
                    None
                }
            })
            .unwrap_or_default();

        Self {
            options: default_options(),
            syntax_set: SyntaxSet::load_defaults_newlines(),
            highlight_css,
        }
    }

    /// Stylesheet matching the classes emitted for highlighted code.
    pub fn highlight_css(&self) -> &str {
        &self.highlight_css
    }

    pub fn to_html(&self, markdown: &str) -> Result<MarkdownHtml, RenderError> {
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &self.options);

        let mut walker = Rewriter {
            syntax_set: &self.syntax_set,
            contains_code: false,
            contains_math: false,
        };
        walker.visit(root);

        if walker.contains_math {
            warn!(
                target = "application::render::markdown",
                op = "markdown::to_html",
                "TeX math is not supported by htmlkit"
            );
        }

        let mut html = String::new();
        format_html(root, &self.options, &mut html)
            .map_err(|err| RenderError::markdown(err.to_string()))?;
        debug!(
            target = "application::render::markdown",
            op = "markdown::to_html",
            input_len = markdown.len(),
            html_len = html.len(),
            "Markdown converted"
        );

        Ok(MarkdownHtml {
            html,
            contains_code: walker.contains_code,
            contains_math: walker.contains_math,
        })
    }
}

fn default_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.tasklist = true;
    ext.table = true;
    ext.strikethrough = true;
    ext.math_dollars = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.tasklist_classes = true;
    render.r#unsafe = true;

    options
}

struct Rewriter<'s> {
    syntax_set: &'s SyntaxSet,
    contains_code: bool,
    contains_math: bool,
}

impl Rewriter<'_> {
    fn visit<'a>(&mut self, node: &'a AstNode<'a>) {
        let replacement = {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::CodeBlock(block) => {
                    self.contains_code = true;
                    let language = block.info.split_whitespace().next();
                    Some(NodeValue::HtmlBlock(NodeHtmlBlock {
                        block_type: 0,
                        literal: self.highlight(language, &block.literal),
                    }))
                }
                NodeValue::Math(math) => {
                    self.contains_math = true;
                    let class = if math.display_math {
                        "math math-display"
                    } else {
                        "math"
                    };
                    Some(NodeValue::HtmlInline(format!(
                        "<code class=\"{class}\">{}</code>",
                        escape_html(math.literal.trim())
                    )))
                }
                _ => None,
            }
        };

        if let Some(value) = replacement {
            node.data.borrow_mut().value = value;
            return;
        }

        let mut child = node.first_child();
        while let Some(next) = child {
            self.visit(next);
            child = next.next_sibling();
        }
    }

    fn highlight(&self, language: Option<&str>, code: &str) -> String {
        let token = language.unwrap_or("text");
        let syntax = find_syntax(self.syntax_set, token)
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());

        let mut source = code.to_owned();
        if !source.ends_with('\n') {
            source.push('\n');
        }

        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, self.syntax_set, CLASS_STYLE);
        for line in LinesWithEndings::from(source.as_str()) {
            if let Err(err) = generator.parse_html_for_line_which_includes_newline(line) {
                warn!(
                    target = "application::render::markdown",
                    op = "markdown::highlight",
                    language = token,
                    error = %err,
                    "Highlighting failed; emitting plain code"
                );
                return plain_code_block(token, code);
            }
        }

        format!(
            "<pre class=\"syntax-highlight\" data-language=\"{lang}\"><code class=\"language-{lang}\">{}</code></pre>\n",
            generator.finalize(),
            lang = escape_html(&token.to_ascii_lowercase()),
        )
    }
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    let lowercase = token.to_ascii_lowercase();
    syntax_set
        .find_syntax_by_token(&lowercase)
        .or_else(|| syntax_set.find_syntax_by_name(token))
        .or_else(|| syntax_set.find_syntax_by_extension(&lowercase))
}

fn plain_code_block(language: &str, code: &str) -> String {
    format!(
        "<pre><code class=\"language-{}\">{}</code></pre>\n",
        escape_html(&language.to_ascii_lowercase()),
        escape_html(code)
    )
}

pub(crate) fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::telemetry::CapturedLogs;

    #[test]
    fn enabled_extensions_produce_markup() {
        let output = markdown_renderer()
            .to_html("- [x] done\n- [ ] todo\n\n~~gone~~\n\n| a | b |\n|---|---|\n| 1 | 2 |\n")
            .expect("markdown converts");
        assert!(output.html.contains("<table>"));
        assert!(output.html.contains("<del>gone</del>"));
        assert!(output.html.contains("type=\"checkbox\""));
        assert!(!output.contains_math);
    }

    #[test]
    fn fenced_code_is_highlighted_with_classes() {
        let output = markdown_renderer()
            .to_html("```rust\nfn main() {}\n```\n")
            .expect("markdown converts");
        assert!(output.contains_code);
        assert!(output.html.contains("syntax-highlight"));
        assert!(output.html.contains("class=\"syntax-"));
        assert!(!markdown_renderer().highlight_css().is_empty());
    }

    #[test]
    fn dollar_math_is_kept_as_literal_code() {
        let output = markdown_renderer()
            .to_html("Energy: $E = mc^2$\n\n$$\na < b\n$$\n")
            .expect("math does not fail the conversion");
        assert!(output.contains_math);
        assert!(output.html.contains("<code class=\"math\">E = mc^2</code>"));
        assert!(output.html.contains("a &lt; b"));
    }

    #[test]
    fn math_emits_an_unsupported_warning() {
        let renderer = markdown_renderer();
        let logs = CapturedLogs::default();
        tracing::subscriber::with_default(logs.subscriber(), || {
            renderer.to_html("plain\n").expect("markdown converts");
        });
        assert!(!logs.contents().contains("TeX math is not supported"));

        tracing::subscriber::with_default(logs.subscriber(), || {
            renderer.to_html("$x^2$\n").expect("markdown converts");
        });
        let contents = logs.contents();
        assert!(contents.contains("WARN"));
        assert!(contents.contains("TeX math is not supported by htmlkit"));
    }

    #[test]
    fn unknown_languages_fall_back_to_plain_text() {
        let output = markdown_renderer()
            .to_html("```no-such-language\n<tag>\n```\n")
            .expect("markdown converts");
        assert!(output.html.contains("&lt;tag&gt;"));
    }
}
