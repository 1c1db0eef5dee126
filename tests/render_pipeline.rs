//! Pipeline behaviour against the scripted browser backend

mod common;

use common::{sample_png, test_assets, MockLauncher, MockState, Script};
use osm_static_maps::options::ImageFormat;
use osm_static_maps::signals::PageSignal;
use osm_static_maps::{Error, ErrorKind, RenderOptions, RenderOutput, Renderer, RendererConfig, Viewport};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn renderer(script: Script) -> (Renderer<MockLauncher>, Arc<MockState>) {
    renderer_with(script, RendererConfig::default())
}

fn renderer_with(script: Script, config: RendererConfig) -> (Renderer<MockLauncher>, Arc<MockState>) {
    let (launcher, state) = MockLauncher::new(script);
    (Renderer::new(test_assets(), launcher, config), state)
}

fn options(value: serde_json::Value) -> RenderOptions {
    serde_json::from_value(value).expect("valid options")
}

#[tokio::test]
async fn default_render_uses_default_viewport_and_png() {
    let (renderer, state) = renderer(Script::Idle);

    let output = renderer.render(options(json!({}))).await.unwrap();

    assert_eq!(
        output,
        RenderOutput::Image {
            bytes: sample_png(),
            format: ImageFormat::Png
        }
    );
    assert_eq!(
        *state.last_viewport.lock().unwrap(),
        Some(Viewport { width: 800, height: 600 })
    );
    assert_eq!(*state.last_quality.lock().unwrap(), Some(None));
    assert_eq!(MockState::count(&state.closes), 1);
    assert_eq!(MockState::count(&state.detached), 1);

    let html = state.last_html.lock().unwrap().clone().unwrap();
    assert!(html.contains("var maxZoom = 17;"));
    assert!(html.contains("/* leaflet */"));
}

#[tokio::test]
async fn render_to_html_never_touches_the_browser() {
    let (renderer, state) = renderer(Script::Idle);

    let output = renderer
        .render(options(json!({ "renderToHtml": true, "vectorserverUrl": "https://x" })))
        .await
        .unwrap();

    match output {
        RenderOutput::Html(html) => {
            assert!(html.starts_with("<!DOCTYPE html>"));
            assert!(html.contains("var maxZoom = 20;"));
            assert!(!html.contains("{{"));
        }
        other => panic!("expected html, got {other:?}"),
    }
    assert_eq!(MockState::count(&state.launches), 0);
    assert_eq!(MockState::count(&state.pages), 0);
    assert_eq!(MockState::count(&state.screenshots), 0);
    assert!(!renderer.session().has_browser().await);
}

#[tokio::test]
async fn jpeg_quality_is_clamped_before_capture() {
    let (renderer, state) = renderer(Script::Idle);

    renderer
        .render(options(json!({ "type": "jpeg", "quality": 150 })))
        .await
        .unwrap();

    assert_eq!(*state.last_format.lock().unwrap(), Some(ImageFormat::Jpeg));
    assert_eq!(*state.last_quality.lock().unwrap(), Some(Some(100)));
}

#[tokio::test]
async fn console_error_fails_before_screenshot() {
    let (renderer, state) = renderer(Script::Signals(vec![
        PageSignal::ConsoleError("tile layer exploded".into()),
        PageSignal::NetworkIdle,
    ]));

    let err = renderer.render(options(json!({}))).await.unwrap_err();

    assert!(matches!(err, Error::PageRuntimeFault(ref msg) if msg.contains("tile layer exploded")));
    assert_eq!(err.kind(), ErrorKind::PageFault);
    assert_eq!(MockState::count(&state.screenshots), 0);
    assert_eq!(MockState::count(&state.closes), 1);
    assert_eq!(MockState::count(&state.detached), 1);
}

#[tokio::test]
async fn uncaught_exception_is_a_page_fault() {
    let (renderer, state) = renderer(Script::Signals(vec![PageSignal::UncaughtException(
        "ReferenceError: L is not defined".into(),
    )]));

    let err = renderer.render(options(json!({}))).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PageFault);
    assert_eq!(MockState::count(&state.closes), 1);
}

#[tokio::test]
async fn page_that_never_settles_times_out() {
    let config = RendererConfig {
        content_load_timeout_ms: 100,
        ..Default::default()
    };
    let (renderer, state) = renderer_with(Script::Never, config);

    let err = renderer.render(options(json!({}))).await.unwrap_err();

    assert!(matches!(err, Error::ContentLoadTimeout(100)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(MockState::count(&state.screenshots), 0);
    assert_eq!(MockState::count(&state.closes), 1);
}

#[tokio::test]
async fn failed_navigation_propagates_and_releases() {
    let (renderer, state) = renderer(Script::LoadFails);

    let err = renderer.render(options(json!({}))).await.unwrap_err();

    assert!(matches!(err, Error::Page(_)), "{err}");
    assert_eq!(MockState::count(&state.closes), 1);
}

#[tokio::test]
async fn screenshot_failure_still_closes_the_page() {
    let (renderer, state) = renderer(Script::Idle);
    state.fail_screenshot.store(true, Ordering::SeqCst);

    let err = renderer.render(options(json!({}))).await.unwrap_err();

    assert!(matches!(err, Error::Screenshot(_)));
    assert_eq!(MockState::count(&state.closes), 1);
}

#[tokio::test]
async fn conflicting_post_processors_are_rejected_up_front() {
    let (renderer, state) = renderer(Script::Idle);

    let err = renderer
        .render(options(json!({ "imagemin": true, "oxipng": true })))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidOptions(_)));
    assert_eq!(MockState::count(&state.pages), 0);
}

#[tokio::test]
async fn imagemin_reencodes_in_process() {
    let (renderer, _state) = renderer(Script::Idle);

    let output = renderer
        .render(options(json!({ "imagemin": true })))
        .await
        .unwrap();

    let decoded = image::load_from_memory(output.as_bytes()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (8, 4));
}

#[cfg(unix)]
#[tokio::test]
async fn oxipng_pipes_through_the_external_encoder() {
    let mut config = RendererConfig::default();
    config.encoder.program = "cat".into();
    config.encoder.args = vec![];
    let (renderer, state) = renderer_with(Script::Idle, config);

    let output = renderer.render(options(json!({ "oxipng": true }))).await.unwrap();

    assert_eq!(output.as_bytes(), sample_png().as_slice());
    assert_eq!(MockState::count(&state.closes), 1);
}

#[tokio::test]
async fn missing_encoder_fails_the_render_after_release() {
    let mut config = RendererConfig::default();
    config.encoder.program = "/nonexistent/oxipng".into();
    let (renderer, state) = renderer_with(Script::Idle, config);

    let err = renderer.render(options(json!({ "oxipng": true }))).await.unwrap_err();

    assert!(matches!(err, Error::EncoderLaunch(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Encoder);
    assert_eq!(MockState::count(&state.closes), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_renders_share_one_browser() {
    let (renderer, state) = renderer(Script::Idle);
    let renderer = Arc::new(renderer);

    let renders: Vec<_> = (0..10)
        .map(|i| {
            let renderer = renderer.clone();
            tokio::spawn(async move {
                renderer
                    .render(options(json!({ "width": 100 + i, "height": 100 })))
                    .await
            })
        })
        .collect();
    for render in renders {
        render.await.unwrap().unwrap();
    }

    assert_eq!(MockState::count(&state.launches), 1);
    assert_eq!(MockState::count(&state.pages), 10);
    assert_eq!(MockState::count(&state.closes), 10);
}
