//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::infra::fetch::DEFAULT_USER_AGENT;

pub use cli::{
    CliArgs, Command, HtmlArgs, MarkdownArgs, OutputArgs, OutputFormat, TemplateArgs, TextArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "htmlkit";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub fontconfig: FontconfigSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Font configuration variables exported while the font database loads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontconfigSettings {
    pub fontconfig_file: Option<String>,
    pub fontconfig_path: Option<String>,
    pub fontconfig_sysroot: Option<String>,
    pub fc_debug: Option<String>,
    pub fc_dbg_match_filter: Option<String>,
    pub fc_lang: Option<String>,
    pub fontconfig_use_mmap: Option<String>,
}

impl FontconfigSettings {
    /// Variable name and override value, absent values included.
    pub fn env_overrides(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("FONTCONFIG_FILE", self.fontconfig_file.clone()),
            ("FONTCONFIG_PATH", self.fontconfig_path.clone()),
            ("FONTCONFIG_SYSROOT", self.fontconfig_sysroot.clone()),
            ("FC_DEBUG", self.fc_debug.clone()),
            ("FC_DBG_MATCH_FILTER", self.fc_dbg_match_filter.clone()),
            ("FC_LANG", self.fc_lang.clone()),
            ("FONTCONFIG_USE_MMAP", self.fontconfig_use_mmap.clone()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// `None` lets a fetch run until it completes.
    pub fetch_timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Some(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("HTMLKIT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli_overrides(cli);

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    fontconfig: RawFontconfigSettings,
    render: RawRenderSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFontconfigSettings {
    file: Option<String>,
    path: Option<String>,
    sysroot: Option<String>,
    debug: Option<String>,
    dbg_match_filter: Option<String>,
    lang: Option<String>,
    use_mmap: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    fetch_timeout_seconds: Option<u64>,
    user_agent: Option<String>,
}

impl RawSettings {
    fn apply_cli_overrides(&mut self, cli: &CliArgs) {
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = cli.log_json {
            self.logging.json = Some(json);
        }
        self.apply_output_overrides(cli.command.output());
    }

    fn apply_output_overrides(&mut self, overrides: &OutputArgs) {
        if let Some(seconds) = overrides.fetch_timeout_seconds {
            self.render.fetch_timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            fontconfig,
            render,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let fontconfig = build_fontconfig_settings(fontconfig)?;
        let render = build_render_settings(render)?;

        Ok(Self {
            logging,
            fontconfig,
            render,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_fontconfig_settings(
    fontconfig: RawFontconfigSettings,
) -> Result<FontconfigSettings, LoadError> {
    let non_empty = |value: Option<String>| {
        value.and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
    };

    let fc_debug = non_empty(fontconfig.debug);
    if let Some(debug) = fc_debug.as_ref()
        && debug.parse::<u32>().is_err()
    {
        return Err(LoadError::invalid(
            "fontconfig.debug",
            "must be a non-negative integer bit mask",
        ));
    }

    Ok(FontconfigSettings {
        fontconfig_file: non_empty(fontconfig.file),
        fontconfig_path: non_empty(fontconfig.path),
        fontconfig_sysroot: non_empty(fontconfig.sysroot),
        fc_debug,
        fc_dbg_match_filter: non_empty(fontconfig.dbg_match_filter),
        fc_lang: non_empty(fontconfig.lang),
        fontconfig_use_mmap: fontconfig
            .use_mmap
            .map(|enabled| if enabled { "yes" } else { "no" }.to_string()),
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let seconds = render
        .fetch_timeout_seconds
        .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
    let fetch_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));

    let user_agent = match render.user_agent {
        Some(agent) if agent.trim().is_empty() => {
            return Err(LoadError::invalid(
                "render.user_agent",
                "user agent must not be blank",
            ));
        }
        Some(agent) => agent.trim().to_string(),
        None => DEFAULT_USER_AGENT.to_string(),
    };

    Ok(RenderSettings {
        fetch_timeout,
        user_agent,
    })
}
