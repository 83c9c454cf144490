use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use htmlkit::{
    application::render::{MarkdownInput, RenderOptions, RenderOrchestrator, TemplateSpec},
    engine::{FontLibrary, ImageFormat, RasterEngine},
    infra::fetch::{FetchError, FnFetcher},
};
use serde_json::json;
use url::Url;

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: [u8; 2] = [0xFF, 0xD8];

/// Engine without system fonts so output does not depend on the host.
fn orchestrator() -> RenderOrchestrator {
    let engine = RasterEngine::new(Arc::new(FontLibrary::new(fontdb::Database::new())));
    RenderOrchestrator::new(Arc::new(engine))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn html_without_references_encodes_png_and_jpeg() {
    let service = orchestrator();
    let markup = "<html><body><h1>Hello</h1><p>plain paragraph</p></body></html>";

    let png = service
        .render(markup, RenderOptions::new().with_allow_refit(false))
        .await
        .expect("png render");
    assert_eq!(&png[..8], &PNG_MAGIC);
    let decoded = image::load_from_memory(&png).expect("decodable png");
    assert_eq!(decoded.width(), 1200);

    let jpeg = service
        .render(
            markup,
            RenderOptions::new().with_image_format(ImageFormat::jpeg(85)),
        )
        .await
        .expect("jpeg render");
    assert_eq!(&jpeg[..2], &JPEG_MAGIC);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unresolvable_references_still_render() {
    let markup = r#"<html><head>
        <link rel="stylesheet" href="http://127.0.0.1:9/missing.css">
        </head><body>
        <img src="missing.png" width="40" height="40">
        <img src="http://127.0.0.1:9/remote.png">
        <p>text after images</p>
        </body></html>"#;

    let png = orchestrator()
        .render(
            markup,
            RenderOptions::new().with_base_url("file:///definitely/not/here/"),
        )
        .await
        .expect("render completes without resources");
    assert_eq!(&png[..8], &PNG_MAGIC);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_stylesheet_is_applied_through_the_bridge() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("page.css"),
        "body { margin: 0 } .box { padding: 10px; background-color: #ff0000 }",
    )
    .expect("write css");
    let base = Url::from_directory_path(dir.path()).expect("absolute dir");

    let png = orchestrator()
        .render(
            r#"<html><head><link rel="stylesheet" href="page.css"></head>
               <body><div class="box"></div></body></html>"#,
            RenderOptions::new()
                .with_base_url(base.as_str())
                .with_dpi(96.0)
                .with_max_width(40)
                .with_allow_refit(false),
        )
        .await
        .expect("render");

    let image = image::load_from_memory(&png).expect("png").to_rgba8();
    assert_eq!((image.width(), image.height()), (40, 20));
    assert_eq!(image.get_pixel(10, 10).0, [255, 0, 0, 255]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_image_fetcher_is_consulted_per_reference() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetcher = FnFetcher::new(move |_url: String| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<Bytes>, FetchError>(None)
        }
    });

    orchestrator()
        .render(
            r#"<p><img src="a.png"><img src="b.png"></p>"#,
            RenderOptions::new().with_image_fetcher(Arc::new(fetcher)),
        )
        .await
        .expect("render");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn markdown_with_math_renders() {
    let png = orchestrator()
        .render_markdown(
            MarkdownInput::text("# Title\n\nInline $a^2 + b^2$ and\n\n$$\n\\int_0^1 x\\,dx\n$$\n"),
            None,
            RenderOptions::new(),
        )
        .await
        .expect("math does not abort the render");
    assert_eq!(&png[..8], &PNG_MAGIC);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn text_and_templates_render() {
    let service = orchestrator();
    let png = service
        .render_text("first line\n第二行\nthird", None, RenderOptions::new())
        .await
        .expect("text render");
    assert_eq!(&png[..8], &PNG_MAGIC);

    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("card.html"),
        "<div class=\"card\">{% for name in names %}<p>{{ name }}</p>{% endfor %}</div>",
    )
    .expect("write template");
    let jpeg = service
        .render_template(
            &TemplateSpec::new(dir.path(), "card.html"),
            &json!({ "names": ["ada", "grace"] }),
            RenderOptions::new().with_image_format(ImageFormat::jpeg(90)),
        )
        .await
        .expect("template render");
    assert_eq!(&jpeg[..2], &JPEG_MAGIC);
}
