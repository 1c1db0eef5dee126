//! Browser and page lifecycle
//!
//! The backend seams are three small blocking traits: a [`BrowserLauncher`]
//! starts browser processes, a [`BrowserHandle`] is a live process that hands
//! out pages, and a [`PageHandle`] is one isolated page. [`BrowserSession`]
//! keeps a single shared handle, launching it lazily and replacing it when it
//! has disconnected. Every page is handed out as a [`PageLease`], which closes
//! the page exactly once.

use crate::options::ImageFormat;
use crate::signals::{SignalSender, Subscription};
use crate::{Result, Viewport};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Starts browser processes
pub trait BrowserLauncher: Send + Sync + 'static {
    type Browser: BrowserHandle;

    /// Launch a new browser process (blocking)
    fn launch(&self) -> Result<Self::Browser>;
}

/// A running browser process
pub trait BrowserHandle: Clone + Send + Sync + 'static {
    type Page: PageHandle;

    /// Liveness probe
    fn is_connected(&self) -> bool;

    /// Open a fresh page (blocking)
    fn new_page(&self) -> Result<Self::Page>;
}

/// One page inside a browser. All methods block the calling thread.
pub trait PageHandle: Send + Sync + 'static {
    /// Resize the page to the given CSS pixel size
    fn set_viewport(&self, viewport: Viewport) -> Result<()>;

    /// Start forwarding page signals. Listeners stay attached until the
    /// returned subscription is dropped.
    fn subscribe(&self, signals: SignalSender) -> Result<Subscription>;

    /// Start loading `html` as the page's document. Returns once the load has
    /// been committed; settling is reported through the subscription.
    fn load_html(&self, html: &str) -> Result<()>;

    /// Capture the whole page
    fn screenshot(&self, format: ImageFormat, quality: Option<u8>) -> Result<Vec<u8>>;

    /// Close the page
    fn close(&self) -> Result<()>;
}

/// Owns the process-wide browser handle.
///
/// The check-and-launch sequence runs under a lock, so concurrent first
/// callers share one launch instead of racing to start several processes.
pub struct BrowserSession<L: BrowserLauncher> {
    launcher: Arc<L>,
    current: Mutex<Option<L::Browser>>,
}

impl<L: BrowserLauncher> BrowserSession<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher: Arc::new(launcher),
            current: Mutex::new(None),
        }
    }

    /// Return the live browser, launching a new one if there is none or the
    /// current one has disconnected.
    pub async fn browser(&self) -> Result<L::Browser> {
        let mut current = self.current.lock().await;

        if let Some(browser) = current.as_ref() {
            let probe = browser.clone();
            if blocking(move || Ok(probe.is_connected())).await? {
                return Ok(browser.clone());
            }
            warn!("Browser disconnected; launching a replacement");
        }

        let launcher = Arc::clone(&self.launcher);
        let browser = blocking(move || launcher.launch()).await?;
        info!("Browser launched");
        *current = Some(browser.clone());
        Ok(browser)
    }

    /// Open a fresh page on the shared browser.
    pub async fn page(&self) -> Result<PageLease<<L::Browser as BrowserHandle>::Page>> {
        let browser = self.browser().await?;
        let page = blocking(move || browser.new_page()).await?;
        debug!("Page opened");
        Ok(PageLease::new(page))
    }

    /// Whether a browser has been launched and not yet replaced.
    pub async fn has_browser(&self) -> bool {
        self.current.lock().await.is_some()
    }
}

/// Scoped ownership of one page.
///
/// [`PageLease::release`] closes the page and reports the outcome. If the
/// lease is dropped without being released (an early return, a panic, a
/// cancelled task) the page is closed from `Drop` instead. Either way the page
/// is closed exactly once.
pub struct PageLease<P: PageHandle> {
    page: Arc<P>,
    released: bool,
}

impl<P: PageHandle> PageLease<P> {
    pub fn new(page: P) -> Self {
        Self {
            page: Arc::new(page),
            released: false,
        }
    }

    /// Shared handle for moving into blocking calls
    pub fn page(&self) -> Arc<P> {
        Arc::clone(&self.page)
    }

    /// Close the page now.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let page = Arc::clone(&self.page);
        let res = blocking(move || page.close()).await;
        debug!("Page closed");
        res
    }
}

impl<P: PageHandle> Drop for PageLease<P> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let page = Arc::clone(&self.page);
        let close = move || {
            if let Err(e) = page.close() {
                warn!("Failed to close page on drop: {}", e);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(close);
            }
            Err(_) => close(),
        }
    }
}

/// Run a blocking backend call on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
