//! Capture Relay
//!
//! Carries messages from the trigger side to a single [`Router`] that owns the
//! privileged capabilities: rasterizing the page, highlighting elements and
//! talking to the collector. Sending never waits for the outcome, and failures
//! stay inside the router, where they are logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::collector::Sink;
use crate::error::{Error, Result};
use crate::geometry::BBox;
use crate::payload::CapturePayload;
use crate::trigger::{Capture, CaptureRecord};

/// Messages understood by the router, tagged by `action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    /// `{"action": "capture", "data": {url, timestamp, bbox_tree}}`
    Capture {
        data: CaptureRecord,
        /// Viewport the tree was measured against, for a size sanity check
        #[serde(rename = "viewRect", default, skip_serializing_if = "Option::is_none")]
        view_rect: Option<BBox>,
    },
    /// `{"action": "highlightElement", "selector": "..."}`
    HighlightElement { selector: String },
    /// `{"action": "clearHighlight"}`
    ClearHighlight,
    /// `{"action": "ping", "message": "..."}`
    Ping { message: String },
}

impl From<Capture> for Message {
    fn from(capture: Capture) -> Self {
        Message::Capture {
            data: capture.record,
            view_rect: Some(capture.view_rect),
        }
    }
}

/// Produces the bitmap of the currently visible viewport
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Base64-encoded image, optionally wrapped in a `data:` URI
    async fn rasterize(&self) -> Result<String>;
}

/// Draws attention to page elements (the developer-tools surface)
#[async_trait]
pub trait Highlighter: Send + Sync {
    async fn highlight(&self, selector: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    /// Remove whatever the highlighter installed in the page
    async fn teardown(&self) -> Result<()>;
}

/// Drop a `data:<mime>;base64,` prefix, leaving the bare base64 payload
pub fn strip_data_uri_prefix(encoded: &str) -> &str {
    if encoded.starts_with("data:") {
        if let Some((_, data)) = encoded.split_once(',') {
            return data;
        }
    }
    encoded
}

/// Sending half of the relay channel; cheap to clone
#[derive(Debug, Clone)]
pub struct Relay {
    tx: mpsc::UnboundedSender<Message>,
}

impl Relay {
    /// Create a relay and the receiver a [`Router`] consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message without waiting for it to be handled
    pub fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::RelayClosed)
    }

    /// Queue a capture
    pub fn capture(&self, capture: Capture) -> Result<()> {
        self.send(capture.into())
    }
}

/// Single dispatcher for every relay message
pub struct Router {
    rasterizer: Arc<dyn Rasterizer>,
    sink: Arc<dyn Sink>,
    highlighter: Option<Box<dyn Highlighter>>,
}

impl Router {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, sink: Arc<dyn Sink>) -> Self {
        Self {
            rasterizer,
            sink,
            highlighter: None,
        }
    }

    /// Hand the router ownership of a highlighter; it is torn down when the router stops
    pub fn with_highlighter(mut self, highlighter: Box<dyn Highlighter>) -> Self {
        self.highlighter = Some(highlighter);
        self
    }

    /// Process messages until every [`Relay`] is dropped, then tear down
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<Message>) {
        tracing::debug!("Relay router started");
        while let Some(message) = rx.recv().await {
            self.dispatch(message).await;
        }
        self.shutdown().await;
        tracing::debug!("Relay router stopped");
    }

    /// Handle one message; errors are logged, never returned
    pub async fn dispatch(&self, message: Message) {
        match message {
            Message::Capture { data, view_rect } => {
                let url = data.url.clone();
                match self.capture(data, view_rect).await {
                    Ok(()) => {}
                    Err(e) if e.is_delivery_failure() => {
                        tracing::warn!("Collector did not take capture of {}: {}", url, e)
                    }
                    Err(e) => tracing::error!("Capture of {} dropped: {}", url, e),
                }
            }
            Message::HighlightElement { selector } => match &self.highlighter {
                Some(h) => {
                    if let Err(e) = h.highlight(&selector).await {
                        tracing::warn!("Highlight of '{}' failed: {}", selector, e);
                    }
                }
                None => tracing::warn!("No highlight surface; ignoring '{}'", selector),
            },
            Message::ClearHighlight => {
                if let Some(h) = &self.highlighter {
                    if let Err(e) = h.clear().await {
                        tracing::warn!("Clearing highlight failed: {}", e);
                    }
                }
            }
            Message::Ping { message } => {
                if let Err(e) = self.sink.ping(&message).await {
                    tracing::warn!("Ping failed: {}", e);
                }
            }
        }
    }

    async fn capture(&self, record: CaptureRecord, view_rect: Option<BBox>) -> Result<()> {
        let encoded = self.rasterizer.rasterize().await?;
        let image =
            base64::engine::general_purpose::STANDARD.decode(strip_data_uri_prefix(&encoded))?;
        let payload = CapturePayload::new(record, image);

        if let Some(view) = view_rect {
            payload.check_alignment(&view);
        }

        tracing::info!(
            "Delivering capture of {} ({} elements, {} image bytes)",
            payload.url,
            payload.bbox_tree.as_ref().map(|t| t.len()).unwrap_or(0),
            payload.image.len()
        );
        self.sink.deliver(&payload).await
    }

    async fn shutdown(&self) {
        if let Some(h) = &self.highlighter {
            if let Err(e) = h.teardown().await {
                tracing::debug!("Highlighter teardown failed: {}", e);
            }
        }
    }
}
