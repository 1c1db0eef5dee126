//! osm-static-maps
//!
//! Renders static raster images of a map, optionally with a GeoJSON overlay.
//! An HTML document is generated from a template with the mapping libraries
//! inlined, loaded into a fresh headless-browser page, and captured once the
//! page's network has gone idle. The screenshot can then be re-encoded in
//! process or through an external compressor.
//!
//! # Features
//!
//! - **CDP Backend** (default): drives headless Chrome through the Chrome
//!   DevTools Protocol (`cdp` feature)
//! - **Pluggable backends**: the pipeline only talks to the traits in
//!   [`session`], so tests and alternative browsers plug in the same way
//! - **Single-shot renders**: every failure surfaces to the caller, pages are
//!   always released
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use osm_static_maps::{AssetBundle, RenderOptions, Renderer, RendererConfig};
//!
//! let assets = AssetBundle::load("node_modules")?;
//! let renderer = Renderer::with_chrome(assets, RendererConfig::default());
//!
//! let options = RenderOptions::from_json(r#"{"center": "-58.38,-34.60", "zoom": 12}"#)?;
//! let output = renderer.render(options).await?;
//! std::fs::write("map.png", output.as_bytes())?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod assets;
pub mod options;
pub mod pipeline;
pub mod postprocess;
pub mod session;
pub mod signals;
pub mod template;

// Chrome DevTools Protocol backend
#[cfg(feature = "cdp")]
pub mod cdp;

pub use assets::AssetBundle;
pub use options::{ImageFormat, MapOptions, PostProcess, RenderOptions};
pub use pipeline::{RenderOutput, Renderer};
pub use postprocess::PostProcessor;
pub use session::BrowserSession;
pub use template::TemplateRenderer;

/// Configuration for the renderer
///
/// The defaults match what a containerised deployment needs: the browser runs
/// without its sandbox and pages get 20 seconds to reach network-idle.
///
/// # Examples
///
/// ```
/// let cfg = osm_static_maps::RendererConfig::default();
/// assert_eq!(cfg.content_load_timeout_ms, 20000);
/// ```
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// How the browser process is launched
    pub browser: BrowserConfig,
    /// Upper bound for loading the page and reaching network-idle, in milliseconds
    pub content_load_timeout_ms: u64,
    /// Executable used by the external post-processing strategy
    pub encoder: ExternalEncoderConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            content_load_timeout_ms: 20000,
            encoder: ExternalEncoderConfig::default(),
        }
    }
}

/// Launch settings for the shared browser process
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run without a visible window
    pub headless: bool,
    /// Keep Chrome's own sandbox enabled
    pub sandbox: bool,
    /// Browser binary; `None` lets the launcher locate one
    pub executable: Option<PathBuf>,
    /// Extra command-line flags passed through to the browser
    pub args: Vec<String>,
    /// Seconds without CDP traffic before the launcher gives up on the browser
    pub idle_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: false,
            executable: None,
            args: vec!["--no-sandbox".to_string(), "--disable-setuid-sandbox".to_string()],
            idle_timeout_secs: 300,
        }
    }
}

/// External encoder invocation: the image is written to its stdin and the
/// re-encoded image read back from its stdout.
#[derive(Debug, Clone)]
pub struct ExternalEncoderConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for ExternalEncoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("oxipng"),
            args: vec!["-".to_string()],
        }
    }
}

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: options::DEFAULT_WIDTH,
            height: options::DEFAULT_HEIGHT,
        }
    }
}
