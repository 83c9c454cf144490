use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the htmlkit binary.
#[derive(Debug, Parser)]
#[command(
    name = "htmlkit",
    version,
    about = "Render HTML, Markdown, text and templates to images"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "HTMLKIT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render an HTML document.
    Html(HtmlArgs),
    /// Render a Markdown document.
    Markdown(MarkdownArgs),
    /// Render plain text, one paragraph per line.
    Text(TextArgs),
    /// Render a template from a template directory.
    Template(TemplateArgs),
}

impl Command {
    pub fn output(&self) -> &OutputArgs {
        match self {
            Command::Html(args) => &args.output,
            Command::Markdown(args) => &args.output,
            Command::Text(args) => &args.output,
            Command::Template(args) => &args.output,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    /// Image file to write.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Layout width in CSS pixels.
    #[arg(long = "max-width", value_name = "PX")]
    pub max_width: Option<u32>,

    /// Output image format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Png)]
    pub format: OutputFormat,

    /// JPEG quality (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 100)]
    pub jpeg_quality: u8,

    /// Keep the full layout width instead of shrinking to the content.
    #[arg(long = "no-refit", action = clap::ArgAction::SetTrue)]
    pub no_refit: bool,

    /// Target resolution.
    #[arg(long, value_name = "DPI")]
    pub dpi: Option<f32>,

    /// Base URL relative references resolve against.
    #[arg(long = "base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// Override the per-resource fetch timeout; 0 waits indefinitely.
    #[arg(long = "fetch-timeout-seconds", value_name = "SECONDS")]
    pub fetch_timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct HtmlArgs {
    /// HTML file to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct MarkdownArgs {
    /// Markdown file to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Stylesheet replacing the bundled GitHub style.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub css: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct TextArgs {
    /// Text file to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Stylesheet replacing the bundled text style.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub css: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct TemplateArgs {
    /// Directory templates are loaded from.
    #[arg(long = "dir", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub dir: PathBuf,

    /// Template name inside the directory.
    #[arg(value_name = "NAME")]
    pub name: String,

    /// JSON file providing the template context.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub context: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}
