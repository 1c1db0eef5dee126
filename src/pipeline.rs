//! The render pipeline
//!
//! `normalize -> html -> (html only? done) -> page -> settle -> screenshot ->
//! post-process`. Each render is single shot: any failure is returned to the
//! caller, nothing is retried. The page is released before post-processing
//! starts, on success and on failure alike.

use crate::assets::AssetBundle;
use crate::options::{ImageFormat, MapOptions, RenderOptions};
use crate::postprocess::PostProcessor;
use crate::session::{blocking, BrowserLauncher, BrowserSession, PageHandle, PageLease};
use crate::signals;
use crate::template::TemplateRenderer;
use crate::{Error, RendererConfig, Result};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// What a render produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutput {
    /// The generated document (`renderToHtml`)
    Html(String),
    /// The encoded image
    Image { bytes: Vec<u8>, format: ImageFormat },
}

impl RenderOutput {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RenderOutput::Html(html) => html.as_bytes(),
            RenderOutput::Image { bytes, .. } => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RenderOutput::Html(html) => html.into_bytes(),
            RenderOutput::Image { bytes, .. } => bytes,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            RenderOutput::Html(_) => "text/html; charset=utf-8",
            RenderOutput::Image { format, .. } => format.mime_type(),
        }
    }
}

/// Renders map requests on a shared browser
pub struct Renderer<L: BrowserLauncher> {
    templates: TemplateRenderer,
    session: BrowserSession<L>,
    postprocessor: PostProcessor,
    content_load_timeout: Duration,
}

#[cfg(feature = "cdp")]
impl Renderer<crate::cdp::ChromeLauncher> {
    /// Renderer backed by headless Chrome
    pub fn with_chrome(assets: impl Into<Arc<AssetBundle>>, config: RendererConfig) -> Self {
        let launcher = crate::cdp::ChromeLauncher::new(config.browser.clone());
        Self::new(assets, launcher, config)
    }
}

impl<L: BrowserLauncher> Renderer<L> {
    pub fn new(assets: impl Into<Arc<AssetBundle>>, launcher: L, config: RendererConfig) -> Self {
        Self {
            templates: TemplateRenderer::new(assets.into()),
            session: BrowserSession::new(launcher),
            postprocessor: PostProcessor::new(config.encoder),
            content_load_timeout: Duration::from_millis(config.content_load_timeout_ms),
        }
    }

    pub fn session(&self) -> &BrowserSession<L> {
        &self.session
    }

    /// Render a request to an image, or to HTML when `renderToHtml` is set.
    pub async fn render(&self, options: RenderOptions) -> Result<RenderOutput> {
        let options = options.normalize()?;
        debug!(
            "Rendering {}x{} {} (post-process: {:?})",
            options.viewport.width, options.viewport.height, options.format, options.post_process
        );

        let html = self.templates.render(&options)?;
        if options.render_to_html {
            debug!("Returning generated HTML ({} bytes)", html.len());
            return Ok(RenderOutput::Html(html));
        }

        let screenshot = self.capture(&options, html).await?;
        let bytes = self
            .postprocessor
            .apply(options.post_process, options.format, screenshot)
            .await?;

        Ok(RenderOutput::Image {
            bytes,
            format: options.format,
        })
    }

    /// Acquire a page, capture, and release the page whatever happened.
    async fn capture(&self, options: &MapOptions, html: String) -> Result<Vec<u8>> {
        let lease = self.session.page().await?;
        let result = self.capture_on(&lease, options, html).await;

        if let Err(e) = lease.release().await {
            warn!("Failed to close page: {}", e);
        }
        result
    }

    async fn capture_on<P: PageHandle>(
        &self,
        lease: &PageLease<P>,
        options: &MapOptions,
        html: String,
    ) -> Result<Vec<u8>> {
        let page = lease.page();
        let (tx, mut rx) = signals::channel();

        let subscription = {
            let page = Arc::clone(&page);
            blocking(move || page.subscribe(tx)).await?
        };

        let viewport = options.viewport;
        {
            let page = Arc::clone(&page);
            blocking(move || page.set_viewport(viewport)).await?;
        }

        let load = {
            let page = Arc::clone(&page);
            async move { blocking(move || page.load_html(&html)).await }
        };
        let settled = tokio::time::timeout(self.content_load_timeout, signals::settle(load, &mut rx)).await;

        // First signal decided the race; nothing after it matters.
        subscription.detach();
        drop(rx);

        match settled {
            Ok(res) => res?,
            Err(_) => {
                return Err(Error::ContentLoadTimeout(
                    self.content_load_timeout.as_millis() as u64,
                ))
            }
        }
        debug!("Page settled; capturing");

        let format = options.format;
        let quality = options.capture_quality();
        blocking(move || page.screenshot(format, quality)).await
    }
}
