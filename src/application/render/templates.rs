use askama::Template;
use minijinja::{AutoEscape, Environment};
use serde::Serialize;
use tracing::debug;

use super::types::{RenderError, TemplateSpec};

/// Directory holding the bundled pages and stylesheets.
pub const BUNDLED_TEMPLATES_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates");

pub const TEXT_CSS: &str = include_str!("../../../templates/text.css");
pub const GITHUB_MARKDOWN_CSS: &str = include_str!("../../../templates/github-markdown-light.css");

#[derive(Template)]
#[template(path = "text.html")]
pub struct TextPage<'a> {
    pub css: &'a str,
    pub lines: Vec<&'a str>,
}

impl<'a> TextPage<'a> {
    pub fn new(text: &'a str, css: &'a str) -> Self {
        Self {
            css,
            lines: text.lines().collect(),
        }
    }
}

#[derive(Template)]
#[template(path = "markdown.html")]
pub struct MarkdownPage<'a> {
    pub css: &'a str,
    pub body: &'a str,
}

pub(crate) fn render_page<T: Template>(page: &T) -> Result<String, RenderError> {
    page.render()
        .map_err(|err| RenderError::template(format!("built-in page: {err}")))
}

/// Render `spec` from its template directory with `context` as the root
/// variables.
pub fn template_to_html<C>(spec: &TemplateSpec, context: &C) -> Result<String, RenderError>
where
    C: Serialize + ?Sized,
{
    let mut env = Environment::new();
    env.set_loader(minijinja::path_loader(&spec.dir));
    // Context values are trusted markup fragments.
    env.set_auto_escape_callback(|_| AutoEscape::None);
    if let Some(customize) = spec.customize.as_ref() {
        customize(&mut env);
        debug!(
            target = "application::render::templates",
            op = "templates::customize",
            dir = %spec.dir.display(),
            "Custom template hooks loaded"
        );
    }

    let template = env.get_template(&spec.name).map_err(|err| {
        RenderError::template(format!("`{}` in {}: {err}", spec.name, spec.dir.display()))
    })?;
    template
        .render(context)
        .map_err(|err| RenderError::template(format!("`{}`: {err}", spec.name)))
}
