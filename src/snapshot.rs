//! Page Snapshot
//!
//! The page-side half of a capture. A single script turn walks the live DOM
//! and records, for every element, its client rect and the computed-style
//! facts the visibility predicate needs, together with the window metrics.
//! The result is frozen: extraction runs over it afterwards, so the DOM can
//! change freely once the script has returned.

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// Index of an element inside a [`DomTree`]
pub type NodeId = usize;

/// Marks page elements this crate injects; snapshots skip them
pub const OVERLAY_ATTRIBUTE: &str = "data-webuicapture-overlay";

/// Default cap on the number of elements one snapshot records
pub const DEFAULT_MAX_NODES: usize = 50_000;

/// Which element the capture walk starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureRoot {
    /// `document.documentElement`
    #[default]
    DocumentElement,
    /// `document.body`
    Body,
}

impl CaptureRoot {
    fn js_expr(self) -> &'static str {
        match self {
            CaptureRoot::DocumentElement => "document.documentElement",
            CaptureRoot::Body => "document.body",
        }
    }
}

/// Window state at the moment the snapshot was taken (CSS pixels)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowMetrics {
    pub url: String,
    #[serde(default)]
    pub scroll_x: f64,
    #[serde(default)]
    pub scroll_y: f64,
    pub inner_width: f64,
    pub inner_height: f64,
    #[serde(default = "default_pixel_ratio")]
    pub device_pixel_ratio: f64,
}

fn default_pixel_ratio() -> f64 {
    1.0
}

/// One element as seen by the snapshot script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    /// `tagName` as reported by the page
    pub tag: String,
    /// Parent index; always lower than this element's own index
    #[serde(default)]
    pub parent: Option<NodeId>,
    /// `getBoundingClientRect()` as `[left, top, right, bottom]`
    pub rect: Rect,
    #[serde(default = "default_true")]
    pub connected: bool,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub opacity: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl ElementSnapshot {
    /// A connected, fully opaque, displayed element
    pub fn new(tag: impl Into<String>, rect: Rect) -> Self {
        Self {
            tag: tag.into(),
            parent: None,
            rect,
            connected: true,
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: Some(1.0),
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }

    pub fn with_visibility(mut self, visibility: impl Into<String>) -> Self {
        self.visibility = visibility.into();
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = Some(opacity);
        self
    }

    pub fn detached(mut self) -> Self {
        self.connected = false;
        self
    }
}

/// Element arena in document (pre-)order with a child index.
///
/// Node 0 is the capture root. Parents always precede their children, so the
/// structure is a tree by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomTree {
    nodes: Vec<ElementSnapshot>,
    children: Vec<Vec<NodeId>>,
}

impl DomTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element under `parent` (or as the root when `None`)
    ///
    /// # Panics
    /// If `parent` does not name an element already in the tree.
    pub fn push(&mut self, parent: Option<NodeId>, mut element: ElementSnapshot) -> NodeId {
        let id = self.nodes.len();
        element.parent = parent;
        if let Some(p) = parent {
            assert!(p < id, "parent {} must precede child {}", p, id);
            self.children[p].push(id);
        }
        self.nodes.push(element);
        self.children.push(Vec::new());
        id
    }

    /// Build from the flat list produced by the snapshot script
    pub fn from_nodes(nodes: Vec<ElementSnapshot>) -> Result<Self, String> {
        let mut tree = Self {
            nodes: Vec::with_capacity(nodes.len()),
            children: Vec::with_capacity(nodes.len()),
        };
        for (id, element) in nodes.into_iter().enumerate() {
            match element.parent {
                Some(p) if p >= id => {
                    return Err(format!("element {} names parent {} out of order", id, p));
                }
                None if id > 0 => {
                    return Err(format!("element {} has no parent", id));
                }
                _ => {}
            }
            let parent = element.parent;
            tree.push(parent, element);
        }
        Ok(tree)
    }

    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&ElementSnapshot> {
        self.nodes.get(id)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Wire form returned by the snapshot script
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    metrics: WindowMetrics,
    #[serde(default)]
    nodes: Vec<ElementSnapshot>,
    #[serde(default)]
    truncated: bool,
}

/// Frozen page state: window metrics plus the element tree
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSnapshot")]
pub struct PageSnapshot {
    pub metrics: WindowMetrics,
    pub dom: DomTree,
    /// The script stopped early because the element cap was reached
    pub truncated: bool,
}

impl TryFrom<RawSnapshot> for PageSnapshot {
    type Error = String;

    fn try_from(raw: RawSnapshot) -> Result<Self, Self::Error> {
        Ok(Self {
            metrics: raw.metrics,
            dom: DomTree::from_nodes(raw.nodes)?,
            truncated: raw.truncated,
        })
    }
}

/// JavaScript function (not yet invoked) that takes the snapshot.
///
/// The walk is iterative and pushes children in reverse so nodes come out in
/// document pre-order. It never yields, so everything it reports belongs to
/// one rendering state. Elements carrying [`OVERLAY_ATTRIBUTE`] are skipped.
pub fn snapshot_function(root: CaptureRoot, max_nodes: usize) -> String {
    format!(
        r#"function () {{
    const metrics = {{
        url: window.location.href,
        scrollX: window.scrollX,
        scrollY: window.scrollY,
        innerWidth: window.innerWidth,
        innerHeight: window.innerHeight,
        devicePixelRatio: window.devicePixelRatio || 1
    }};
    const nodes = [];
    const root = {root};
    const stack = root ? [[root, null]] : [];
    while (stack.length > 0 && nodes.length < {max_nodes}) {{
        const [el, parent] = stack.pop();
        const r = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        const opacity = parseFloat(style.opacity);
        const index = nodes.length;
        nodes.push({{
            tag: el.tagName,
            parent: parent,
            rect: [r.left, r.top, r.right, r.bottom],
            connected: el.isConnected,
            display: style.display,
            visibility: style.visibility,
            opacity: Number.isFinite(opacity) ? opacity : null
        }});
        const kids = el.children;
        for (let i = kids.length - 1; i >= 0; i--) {{
            if (kids[i].hasAttribute('{overlay}')) continue;
            stack.push([kids[i], index]);
        }}
    }}
    return {{ metrics: metrics, nodes: nodes, truncated: stack.length > 0 }};
}}"#,
        root = root.js_expr(),
        max_nodes = max_nodes,
        overlay = OVERLAY_ATTRIBUTE,
    )
}

/// Expression that takes the snapshot immediately, for `Runtime.evaluate`
pub fn snapshot_expression(root: CaptureRoot, max_nodes: usize) -> String {
    format!("({})()", snapshot_function(root, max_nodes))
}
