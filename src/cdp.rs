//! Chrome DevTools Protocol backend (uses the `headless_chrome` crate)
//!
//! Pages never touch the network for their own document: the page navigates
//! to [`DOCUMENT_URL`] and request interception fulfills that one request with
//! the generated HTML. Every other request (tiles, vector styles) continues
//! untouched. Network-idle is Chrome's own `networkIdle` lifecycle event for
//! the document loader of that navigation.

use crate::options::ImageFormat;
use crate::session::{BrowserHandle, BrowserLauncher, PageHandle};
use crate::signals::{PageSignal, SignalSender, Subscription};
use crate::{BrowserConfig, Error, Result, Viewport};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::{EventListener, RequestInterceptor, RequestPausedDecision, Tab};
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FulfillRequest, HeaderEntry};
use headless_chrome::protocol::cdp::Log;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::protocol::cdp::Runtime;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Internal URL the generated document is served from
pub const DOCUMENT_URL: &str = "http://osm-static-maps.invalid/map.html";

type SyncListener = dyn EventListener<Event> + Send + Sync;

/// Launches headless Chrome with the configured flags
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Browser = ChromeBrowser;

    fn launch(&self) -> Result<ChromeBrowser> {
        let args: Vec<&OsStr> = self.config.args.iter().map(OsStr::new).collect();

        let launch_options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(self.config.sandbox)
            .path(self.config.executable.clone())
            .args(args)
            .idle_browser_timeout(Duration::from_secs(self.config.idle_timeout_secs))
            .build()
            .map_err(|e| Error::BrowserLaunch(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::BrowserLaunch(format!("Failed to launch browser: {}", e)))?;

        Ok(ChromeBrowser {
            browser: Arc::new(browser),
        })
    }
}

/// Shared handle to a running Chrome process
#[derive(Clone)]
pub struct ChromeBrowser {
    browser: Arc<Browser>,
}

impl BrowserHandle for ChromeBrowser {
    type Page = ChromePage;

    fn is_connected(&self) -> bool {
        self.browser.get_version().is_ok()
    }

    fn new_page(&self) -> Result<ChromePage> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::Page(format!("Failed to create tab: {}", e)))?;
        Ok(ChromePage::new(tab))
    }
}

/// Which document load the page is waiting on
#[derive(Debug, Default)]
struct LoadState {
    navigating: bool,
    loader_id: Option<String>,
}

/// One Chrome tab
pub struct ChromePage {
    tab: Arc<Tab>,
    viewport: Mutex<Viewport>,
    load: Arc<Mutex<LoadState>>,
}

impl ChromePage {
    fn new(tab: Arc<Tab>) -> Self {
        Self {
            tab,
            viewport: Mutex::new(Viewport::default()),
            load: Arc::new(Mutex::new(LoadState::default())),
        }
    }

    fn resize(&self, width: u32, height: u32) -> Result<()> {
        self.tab
            .set_bounds(Bounds::Normal {
                left: Some(0),
                top: Some(0),
                width: Some(f64::from(width)),
                height: Some(f64::from(height)),
            })
            .map_err(|e| Error::Page(format!("Failed to set viewport: {}", e)))?;
        Ok(())
    }

    /// Grow the window to the document's scroll size so the capture covers
    /// the full page.
    fn expand_to_content(&self) -> Result<()> {
        let eval = self
            .tab
            .evaluate(
                "JSON.stringify([document.documentElement.scrollWidth, document.documentElement.scrollHeight])",
                false,
            )
            .map_err(|e| Error::Screenshot(format!("Failed to measure page: {}", e)))?;

        let size = eval
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .and_then(|s| serde_json::from_str::<[u32; 2]>(s).ok());

        let Some([width, height]) = size else {
            return Ok(());
        };

        let viewport = *self
            .viewport
            .lock()
            .map_err(|_| Error::Other("viewport lock poisoned".into()))?;
        if width > viewport.width || height > viewport.height {
            debug!("Expanding capture area to {}x{}", width, height);
            self.resize(width.max(viewport.width), height.max(viewport.height))?;
        }
        Ok(())
    }
}

impl PageHandle for ChromePage {
    fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.resize(viewport.width, viewport.height)?;
        *self
            .viewport
            .lock()
            .map_err(|_| Error::Other("viewport lock poisoned".into()))? = viewport;
        Ok(())
    }

    fn subscribe(&self, signals: SignalSender) -> Result<Subscription> {
        self.tab
            .enable_runtime()
            .map_err(|e| Error::Page(format!("Failed to enable runtime events: {}", e)))?;
        self.tab
            .enable_log()
            .map_err(|e| Error::Page(format!("Failed to enable log events: {}", e)))?;

        let load = Arc::clone(&self.load);
        let listener: Arc<SyncListener> = Arc::new(move |event: &Event| {
            if let Some(signal) = classify(event, &load) {
                // The receiver is gone once the race is decided.
                let _ = signals.send(signal);
            }
        });

        let registered = self
            .tab
            .add_event_listener(listener)
            .map_err(|e| Error::Page(format!("Failed to add event listener: {}", e)))?;

        let tab = Arc::downgrade(&self.tab);
        Ok(Subscription::new(move || {
            if let Some(tab) = tab.upgrade() {
                if let Err(e) = tab.remove_event_listener(&registered) {
                    warn!("Failed to remove page listener: {}", e);
                }
            }
        }))
    }

    fn load_html(&self, html: &str) -> Result<()> {
        let body = base64::engine::general_purpose::STANDARD.encode(html.as_bytes());

        let interceptor: Arc<dyn RequestInterceptor + Send + Sync> = Arc::new(
            move |_transport: Arc<Transport>, _session_id: SessionId, event: RequestPausedEvent| {
                if event.params.request.url != DOCUMENT_URL {
                    return RequestPausedDecision::Continue(None);
                }

                let fulfill = FulfillRequest {
                    request_id: event.params.request_id.clone(),
                    response_code: 200,
                    response_headers: Some(vec![HeaderEntry {
                        name: "Content-Type".to_string(),
                        value: "text/html; charset=utf-8".to_string(),
                    }]),
                    binary_response_headers: None,
                    body: Some(body.clone()),
                    response_phrase: None,
                };

                RequestPausedDecision::Fulfill(fulfill)
            },
        );

        self.tab
            .enable_fetch(None, Some(false))
            .map_err(|e| Error::Page(format!("Failed to enable fetch domain: {}", e)))?;
        self.tab
            .enable_request_interception(interceptor)
            .map_err(|e| Error::Page(format!("Failed to enable request interception: {}", e)))?;

        {
            let mut state = self
                .load
                .lock()
                .map_err(|_| Error::Other("load state lock poisoned".into()))?;
            state.navigating = true;
            state.loader_id = None;
        }

        self.tab
            .navigate_to(DOCUMENT_URL)
            .map_err(|e| Error::Page(format!("Navigation failed: {}", e)))?;
        Ok(())
    }

    fn screenshot(&self, format: ImageFormat, quality: Option<u8>) -> Result<Vec<u8>> {
        self.expand_to_content()?;

        let format = match format {
            ImageFormat::Png => Page::CaptureScreenshotFormatOption::Png,
            ImageFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
        };

        self.tab
            .capture_screenshot(format, quality.map(u32::from), None, true)
            .map_err(|e| Error::Screenshot(e.to_string()))
    }

    fn close(&self) -> Result<()> {
        self.tab.close(true)?;
        Ok(())
    }
}

/// Map a raw CDP event onto a page signal.
///
/// Console output at error severity comes from two domains: `console.error`
/// calls (`Runtime.consoleAPICalled`) and browser log entries
/// (`Log.entryAdded`).
///
/// `networkIdle` only counts for the first document committed after
/// `load_html` started; idle events from the initial blank document or from
/// child frames are ignored.
fn classify(event: &Event, load: &Mutex<LoadState>) -> Option<PageSignal> {
    match event {
        Event::PageLifecycleEvent(e) => {
            let mut state = load.lock().ok()?;
            if !state.navigating {
                return None;
            }
            match e.params.name.as_str() {
                "init" if state.loader_id.is_none() => {
                    state.loader_id = Some(e.params.loader_id.clone());
                    None
                }
                "networkIdle" if state.loader_id.as_deref() == Some(e.params.loader_id.as_str()) => {
                    Some(PageSignal::NetworkIdle)
                }
                _ => None,
            }
        }
        Event::InspectorTargetCrashed(_) => Some(PageSignal::RuntimeFault("target crashed".to_string())),
        Event::RuntimeExceptionThrown(e) => {
            let details = &e.params.exception_details;
            let text = details
                .exception
                .as_ref()
                .and_then(|ex| ex.description.clone())
                .unwrap_or_else(|| details.text.clone());
            Some(PageSignal::UncaughtException(text))
        }
        Event::RuntimeConsoleAPICalled(e)
            if matches!(e.params.Type, Runtime::ConsoleAPICalledEventTypeOption::Error) =>
        {
            let text = e
                .params
                .args
                .iter()
                .map(|arg| match (&arg.value, &arg.description) {
                    (Some(serde_json::Value::String(s)), _) => s.clone(),
                    (Some(v), _) => v.to_string(),
                    (None, Some(d)) => d.clone(),
                    (None, None) => String::new(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            Some(PageSignal::ConsoleError(text))
        }
        // Browser-side log entries (failed resource loads among them); worker
        // logs are not the page's own.
        Event::LogEntryAdded(e)
            if matches!(e.params.entry.level, Log::LogEntryLevel::Error)
                && !matches!(e.params.entry.source, Log::LogEntrySource::Worker) =>
        {
            let entry = &e.params.entry;
            let text = match &entry.url {
                Some(url) => format!("{} ({})", entry.text, url),
                None => entry.text.clone(),
            };
            Some(PageSignal::ConsoleError(text))
        }
        _ => None,
    }
}
