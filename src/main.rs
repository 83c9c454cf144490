use std::{path::Path, process};

use htmlkit::{
    application::{
        error::AppError,
        render::{
            MarkdownInput, RenderError, RenderOptions, RenderOrchestrator, TemplateSpec,
            configure_render_service, render_service,
        },
    },
    config::{self, Command, OutputArgs, OutputFormat},
    engine::{ImageFormat, init_font_database},
    infra::{fetch::configure_http_client, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;
    configure_http_client(&settings.render.user_agent);

    let fonts = settings.fontconfig.clone();
    tokio::task::spawn_blocking(move || init_font_database(&fonts))
        .await
        .map_err(|err| AppError::unexpected(format!("font initialization task failed: {err}")))??;

    configure_render_service(RenderOrchestrator::from_settings(&settings.render))
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    let command = cli_args.command;
    let output = command.output().clone();
    let options = render_options(&output)?;
    let service = render_service();

    let image = match command {
        Command::Html(args) => {
            let markup = read_input(&args.input).await?;
            service.render(markup, options).await?
        }
        Command::Markdown(args) => {
            service
                .render_markdown(
                    MarkdownInput::path(&args.input),
                    args.css.as_deref(),
                    options,
                )
                .await?
        }
        Command::Text(args) => {
            let text = read_input(&args.input).await?;
            service
                .render_text(&text, args.css.as_deref(), options)
                .await?
        }
        Command::Template(args) => {
            let context = match args.context.as_ref() {
                Some(path) => {
                    let raw = read_input(path).await?;
                    serde_json::from_str::<serde_json::Value>(&raw).map_err(|err| {
                        AppError::validation(format!(
                            "template context `{}` is not valid JSON: {err}",
                            path.display()
                        ))
                    })?
                }
                None => serde_json::Value::Object(serde_json::Map::new()),
            };
            let spec = TemplateSpec::new(&args.dir, &args.name);
            service.render_template(&spec, &context, options).await?
        }
    };

    tokio::fs::write(&output.output, &image)
        .await
        .map_err(|err| AppError::Infra(err.into()))?;
    info!(
        target = "htmlkit::main",
        op = "main::write",
        result = "ok",
        path = %output.output.display(),
        bytes = image.len(),
        "Image written"
    );
    Ok(())
}

fn render_options(output: &OutputArgs) -> Result<RenderOptions, AppError> {
    if output.jpeg_quality == 0 || output.jpeg_quality > 100 {
        return Err(AppError::validation(format!(
            "--jpeg-quality must be within 1..=100, got {}",
            output.jpeg_quality
        )));
    }

    let format = match output.format {
        OutputFormat::Png => ImageFormat::Png,
        OutputFormat::Jpeg => ImageFormat::jpeg(output.jpeg_quality),
    };

    let mut options = RenderOptions::new()
        .with_image_format(format)
        .with_allow_refit(!output.no_refit);
    if let Some(max_width) = output.max_width {
        options = options.with_max_width(max_width);
    }
    if let Some(dpi) = output.dpi {
        if !(dpi.is_finite() && dpi > 0.0) {
            return Err(AppError::validation(format!("--dpi must be positive, got {dpi}")));
        }
        options = options.with_dpi(dpi);
    }
    if let Some(base_url) = output.base_url.as_ref() {
        options = options.with_base_url(base_url.clone());
    }
    Ok(options)
}

async fn read_input(path: &Path) -> Result<String, AppError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| AppError::from(RenderError::io(path, err)))
}
