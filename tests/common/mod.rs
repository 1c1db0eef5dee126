//! Scripted in-memory browser backend for pipeline tests

#![allow(dead_code)]

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageBuffer, ImageEncoder, Rgba};
use osm_static_maps::options::ImageFormat;
use osm_static_maps::session::{BrowserHandle, BrowserLauncher, PageHandle};
use osm_static_maps::signals::{PageSignal, SignalSender, Subscription};
use osm_static_maps::{AssetBundle, Error, Result, Viewport};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What a page does once its HTML is loaded
#[derive(Debug, Clone)]
pub enum Script {
    /// Reaches network-idle right away
    Idle,
    /// Never settles
    Never,
    /// Emits these signals in order
    Signals(Vec<PageSignal>),
    /// Navigation itself fails
    LoadFails,
}

#[derive(Default)]
pub struct MockState {
    pub launches: AtomicUsize,
    pub pages: AtomicUsize,
    pub closes: AtomicUsize,
    pub screenshots: AtomicUsize,
    pub detached: AtomicUsize,
    pub fail_screenshot: AtomicBool,
    pub last_quality: Mutex<Option<Option<u8>>>,
    pub last_format: Mutex<Option<ImageFormat>>,
    pub last_viewport: Mutex<Option<Viewport>>,
    pub last_html: Mutex<Option<String>>,
}

impl MockState {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct MockLauncher {
    pub state: Arc<MockState>,
    pub script: Script,
}

impl MockLauncher {
    pub fn new(script: Script) -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        (
            Self {
                state: state.clone(),
                script,
            },
            state,
        )
    }
}

#[derive(Clone)]
pub struct MockBrowser {
    state: Arc<MockState>,
    script: Script,
}

pub struct MockPage {
    state: Arc<MockState>,
    script: Script,
    sender: Arc<Mutex<Option<SignalSender>>>,
}

impl BrowserLauncher for MockLauncher {
    type Browser = MockBrowser;

    fn launch(&self) -> Result<MockBrowser> {
        std::thread::sleep(std::time::Duration::from_millis(10));
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        Ok(MockBrowser {
            state: self.state.clone(),
            script: self.script.clone(),
        })
    }
}

impl BrowserHandle for MockBrowser {
    type Page = MockPage;

    fn is_connected(&self) -> bool {
        true
    }

    fn new_page(&self) -> Result<MockPage> {
        self.state.pages.fetch_add(1, Ordering::SeqCst);
        Ok(MockPage {
            state: self.state.clone(),
            script: self.script.clone(),
            sender: Arc::new(Mutex::new(None)),
        })
    }
}

impl PageHandle for MockPage {
    fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        *self.state.last_viewport.lock().unwrap() = Some(viewport);
        Ok(())
    }

    fn subscribe(&self, signals: SignalSender) -> Result<Subscription> {
        *self.sender.lock().unwrap() = Some(signals);
        let sender = self.sender.clone();
        let state = self.state.clone();
        Ok(Subscription::new(move || {
            sender.lock().unwrap().take();
            state.detached.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn load_html(&self, html: &str) -> Result<()> {
        *self.state.last_html.lock().unwrap() = Some(html.to_string());
        let guard = self.sender.lock().unwrap();
        let sender = guard.as_ref().expect("subscribed before load");
        match &self.script {
            Script::Idle => {
                let _ = sender.send(PageSignal::NetworkIdle);
            }
            Script::Never => {}
            Script::Signals(signals) => {
                for signal in signals {
                    let _ = sender.send(signal.clone());
                }
            }
            Script::LoadFails => return Err(Error::Page("navigation failed".into())),
        }
        Ok(())
    }

    fn screenshot(&self, format: ImageFormat, quality: Option<u8>) -> Result<Vec<u8>> {
        self.state.screenshots.fetch_add(1, Ordering::SeqCst);
        *self.state.last_quality.lock().unwrap() = Some(quality);
        *self.state.last_format.lock().unwrap() = Some(format);
        if self.state.fail_screenshot.load(Ordering::SeqCst) {
            return Err(Error::Screenshot("capture blew up".into()));
        }
        Ok(sample_png())
    }

    fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A small but real PNG
pub fn sample_png() -> Vec<u8> {
    let img = ImageBuffer::from_fn(8, 4, |x, y| Rgba([(x * 30) as u8, (y * 60) as u8, 90, 255]));
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(img.as_raw(), 8, 4, ColorType::Rgba8)
        .unwrap();
    out
}

pub fn test_assets() -> AssetBundle {
    AssetBundle::from_entries([
        ("leafletjs", "/* leaflet */"),
        ("leafletcss", "/* leaflet css */"),
        ("markericonpng", "iVBORw0KGgo="),
    ])
}
