//! # webuicapture
//!
//! Capture web UI datasets: a screenshot of the visible viewport plus a tree of
//! the visible elements' bounding boxes in device pixels.
//!
//! Chrome is driven over a minimal CDP client. The page-side work is a single
//! synchronous script turn that records every element's client rect and
//! visibility facts; the tree is extracted on the Rust side from that frozen
//! snapshot, so geometry is never read across a suspension point.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webuicapture::{Browser, CaptureConfig, HttpCollector, Sink};
//!
//! #[tokio::main]
//! async fn main() -> webuicapture::Result<()> {
//!     let config = CaptureConfig::default();
//!     let browser = Browser::launch_with_config(config.clone()).await?;
//!     let page = browser.new_page("https://example.com").await?;
//!     page.wait_for_navigation().await?;
//!
//!     let payload = page.capture(&config.trigger()).await?;
//!     HttpCollector::new("http://localhost:7659")?.deliver(&payload).await?;
//!
//!     browser.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Interactive capture
//!
//! [`Page::install_trigger`] hooks a modifier-gated click listener into every
//! document of the tab. Each qualifying click becomes a [`Capture`] that goes
//! through a [`Relay`] to a [`Router`], which screenshots the page and hands
//! the payload to a [`Sink`].

pub mod annotate;
pub mod browser;
pub mod cdp;
pub mod collector;
pub mod error;
pub mod geometry;
pub mod highlight;
pub mod layout;
pub mod page;
pub mod payload;
pub mod relay;
pub mod server;
pub mod snapshot;
pub mod trigger;

// Re-exports
pub use annotate::{annotate_capture, AnnotationConfig, AnnotationError};
pub use browser::Browser;
pub use collector::{DirectorySink, HttpCollector, Sink};
pub use error::{Error, Result};
pub use geometry::{BBox, Rect};
pub use highlight::Overlay;
pub use layout::{extract, Anchor, Extractor, LayoutNode, Viewport};
pub use page::Page;
pub use payload::{CaptureDocument, CapturePayload, SavedCapture};
pub use relay::{Message, Relay, Router};
pub use snapshot::{CaptureRoot, DomTree, ElementSnapshot, PageSnapshot, WindowMetrics};
pub use trigger::{Capture, CaptureRecord, CaptureTrigger, ClickEvent, Modifier};

/// Image encoding requested from `Page.captureScreenshot`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Jpeg,
}

impl ScreenshotFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpeg => "jpeg",
        }
    }
}

impl std::str::FromStr for ScreenshotFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ScreenshotFormat::Png),
            "jpeg" | "jpg" => Ok(ScreenshotFormat::Jpeg),
            other => Err(format!("unknown screenshot format: {}", other)),
        }
    }
}

/// Browser and capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Headless mode
    pub headless: bool,
    /// Path to Chrome/Chromium binary
    pub chrome_path: Option<String>,
    /// Custom user agent (None = Chrome's own)
    pub user_agent: Option<String>,
    /// Viewport width in CSS pixels
    pub viewport_width: u32,
    /// Viewport height in CSS pixels
    pub viewport_height: u32,
    /// Force Chrome's device pixel ratio
    pub device_scale_factor: Option<f64>,
    /// Modifier key that gates capture clicks
    pub modifier: Modifier,
    /// Coordinate origin for boxes
    pub anchor: Anchor,
    /// Element the tree starts at
    pub root: CaptureRoot,
    /// Deepest tree level emitted
    pub max_depth: usize,
    /// Most elements recorded per snapshot
    pub max_nodes: usize,
    pub screenshot_format: ScreenshotFormat,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            user_agent: None,
            viewport_width: 1280,
            viewport_height: 800,
            device_scale_factor: None,
            modifier: Modifier::default(),
            anchor: Anchor::default(),
            root: CaptureRoot::default(),
            max_depth: layout::DEFAULT_MAX_DEPTH,
            max_nodes: snapshot::DEFAULT_MAX_NODES,
            screenshot_format: ScreenshotFormat::default(),
        }
    }
}

impl CaptureConfig {
    /// Visible browser window, for interactive capture
    pub fn headful() -> Self {
        Self {
            headless: false,
            ..Default::default()
        }
    }

    /// Boxes relative to the document origin rather than the viewport
    pub fn document_anchored() -> Self {
        Self {
            anchor: Anchor::Document,
            ..Default::default()
        }
    }

    /// Trigger carrying this config's capture settings
    pub fn trigger(&self) -> CaptureTrigger {
        CaptureTrigger::new()
            .modifier(self.modifier)
            .anchor(self.anchor)
            .root(self.root)
            .max_depth(self.max_depth)
            .max_nodes(self.max_nodes)
    }
}
