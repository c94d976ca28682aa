//! Layout Tree Extraction
//!
//! Walks a [`DomTree`] depth-first in document order and keeps every element
//! that is visible and whose device-pixel rectangle meets the capture
//! viewport. Surviving elements carry their rectangle clipped to the viewport
//! and floored to whole pixels, so the boxes line up with the screenshot grid.
//!
//! An element that fails either test is pruned together with its whole
//! subtree, even when a descendant would pass on its own.

use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::geometry::{clip, intersects, to_device_pixels, BBox, Rect};
use crate::snapshot::{DomTree, ElementSnapshot, NodeId, WindowMetrics};

/// Default bound on the extraction depth.
///
/// Every tree level costs two levels of JSON nesting, and the collector
/// decodes with serde_json's default recursion limit of 128.
pub const DEFAULT_MAX_DEPTH: usize = 60;

/// Where coordinate `(0, 0)` sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    /// Top-left corner of the visible viewport; boxes index straight into the screenshot
    #[default]
    Viewport,
    /// Top-left corner of the document; the viewport rectangle moves with the scroll offset
    Document,
}

/// The capture region in device pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Visible region, device pixels
    pub rect: Rect,
    /// Whole device-pixel offset added to scaled client rects
    pub origin: (f64, f64),
    /// Device pixel ratio
    pub pixel_ratio: f64,
}

impl Viewport {
    /// A viewport already expressed in device pixels with no offset
    pub fn new(rect: Rect, pixel_ratio: f64) -> Self {
        Self {
            rect,
            origin: (0.0, 0.0),
            pixel_ratio: sanitize_ratio(pixel_ratio),
        }
    }

    /// Derive the capture viewport from the window metrics of a snapshot.
    ///
    /// With [`Anchor::Document`] the scroll offset is scaled and then floored,
    /// so the viewport starts on a whole pixel and every clipped box stays
    /// inside it.
    pub fn from_metrics(metrics: &WindowMetrics, anchor: Anchor) -> Self {
        let pixel_ratio = sanitize_ratio(metrics.device_pixel_ratio);
        let origin = match anchor {
            Anchor::Viewport => (0.0, 0.0),
            Anchor::Document => (
                (metrics.scroll_x * pixel_ratio).floor(),
                (metrics.scroll_y * pixel_ratio).floor(),
            ),
        };
        let css = Rect::new(0.0, 0.0, metrics.inner_width, metrics.inner_height);
        Self {
            rect: to_device_pixels(&css, pixel_ratio).translate(origin.0, origin.1),
            origin,
            pixel_ratio,
        }
    }

    /// Map a client rect (CSS pixels, viewport-relative) into this viewport's space
    pub fn device_rect(&self, client: &Rect) -> Rect {
        to_device_pixels(client, self.pixel_ratio).translate(self.origin.0, self.origin.1)
    }

    /// Size of the visible region in whole device pixels
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            self.rect.width().round().max(0.0) as u32,
            self.rect.height().round().max(0.0) as u32,
        )
    }
}

fn sanitize_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() && ratio > 0.0 {
        ratio
    } else {
        1.0
    }
}

/// A visible element that survived extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub tag: String,
    pub bbox: BBox,
    /// Reserved for annotations; always empty today
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub children: Vec<LayoutNode>,
}

impl LayoutNode {
    pub fn new(tag: impl Into<String>, bbox: BBox) -> Self {
        Self {
            tag: tag.into(),
            bbox,
            meta: serde_json::Map::new(),
            children: Vec::new(),
        }
    }

    /// Depth-first pre-order iterator over this node and its descendants
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }

    /// Number of nodes in this subtree
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// A node always counts itself
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Levels in this subtree (a leaf has depth 1)
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(LayoutNode::depth).max().unwrap_or(0)
    }
}

/// Iterator returned by [`LayoutNode::iter`]
pub struct Iter<'a> {
    stack: Vec<&'a LayoutNode>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a LayoutNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Visibility predicate.
///
/// Detached, `display: none`, `visibility: hidden|collapse` and fully
/// transparent elements are invisible. Missing style facts count as visible.
pub fn is_visible(element: &ElementSnapshot) -> bool {
    if !element.connected {
        return false;
    }
    if element.display.eq_ignore_ascii_case("none") {
        return false;
    }
    if element.visibility.eq_ignore_ascii_case("hidden")
        || element.visibility.eq_ignore_ascii_case("collapse")
    {
        return false;
    }
    match element.opacity {
        Some(opacity) => opacity > 0.0,
        None => true,
    }
}

/// Recursive, viewport-clipped walk over a [`DomTree`]
pub struct Extractor<'a> {
    dom: &'a DomTree,
    viewport: &'a Viewport,
    max_depth: usize,
    depth_limited: Cell<bool>,
}

impl<'a> Extractor<'a> {
    pub fn new(dom: &'a DomTree, viewport: &'a Viewport) -> Self {
        Self {
            dom,
            viewport,
            max_depth: DEFAULT_MAX_DEPTH,
            depth_limited: Cell::new(false),
        }
    }

    /// Stop descending below `max_depth` levels (the root is level 1)
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Extract the subtree rooted at `node`
    pub fn extract(&self, node: NodeId) -> Option<LayoutNode> {
        self.depth_limited.set(false);
        let tree = self.walk(node, 1);
        if self.depth_limited.get() {
            tracing::warn!(
                "Layout tree cut at depth {}; deeper elements were not walked",
                self.max_depth
            );
        }
        tree
    }

    /// Whether the last [`extract`](Self::extract) hit the depth bound
    pub fn depth_limited(&self) -> bool {
        self.depth_limited.get()
    }

    fn walk(&self, id: NodeId, depth: usize) -> Option<LayoutNode> {
        let element = self.dom.get(id)?;
        if !is_visible(element) {
            return None;
        }

        let rect = self.viewport.device_rect(&element.rect);
        if rect.is_empty() || !intersects(&rect, &self.viewport.rect) {
            return None;
        }

        let mut node = LayoutNode::new(element.tag.clone(), clip(&rect, &self.viewport.rect));

        let children = self.dom.children(id);
        if depth >= self.max_depth {
            if !children.is_empty() {
                self.depth_limited.set(true);
            }
            return Some(node);
        }

        node.children = children
            .iter()
            .filter_map(|&child| self.walk(child, depth + 1))
            .collect();
        Some(node)
    }
}

/// Extract the layout tree under `node` with the default depth bound
pub fn extract(dom: &DomTree, node: NodeId, viewport: &Viewport) -> Option<LayoutNode> {
    Extractor::new(dom, viewport).extract(node)
}
