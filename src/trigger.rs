//! Capture Trigger
//!
//! Decides whether a page click is a capture request and turns a frozen
//! [`PageSnapshot`] into the record handed to the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::BBox;
use crate::layout::{Anchor, Extractor, LayoutNode, Viewport, DEFAULT_MAX_DEPTH};
use crate::snapshot::{CaptureRoot, PageSnapshot, DEFAULT_MAX_NODES};

/// Modifier key that must be held for a click to count as a capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    #[default]
    Ctrl,
    Alt,
    Shift,
    Meta,
}

impl Modifier {
    /// Name of the matching boolean on a DOM `MouseEvent`
    pub fn event_property(self) -> &'static str {
        match self {
            Modifier::Ctrl => "ctrlKey",
            Modifier::Alt => "altKey",
            Modifier::Shift => "shiftKey",
            Modifier::Meta => "metaKey",
        }
    }

    /// CDP `Input.dispatchMouseEvent` modifier bit
    pub fn cdp_flag(self) -> i32 {
        match self {
            Modifier::Alt => 1,
            Modifier::Ctrl => 2,
            Modifier::Meta => 4,
            Modifier::Shift => 8,
        }
    }
}

impl std::str::FromStr for Modifier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Ok(Modifier::Ctrl),
            "alt" | "option" => Ok(Modifier::Alt),
            "shift" => Ok(Modifier::Shift),
            "meta" | "cmd" | "command" => Ok(Modifier::Meta),
            other => Err(format!("unknown modifier: {}", other)),
        }
    }
}

/// Button and modifier state of a DOM click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    /// `MouseEvent.button` (0 = primary)
    #[serde(default)]
    pub button: i16,
    #[serde(default)]
    pub alt_key: bool,
    #[serde(default)]
    pub ctrl_key: bool,
    #[serde(default)]
    pub meta_key: bool,
    #[serde(default)]
    pub shift_key: bool,
}

impl ClickEvent {
    pub fn primary() -> Self {
        Self::default()
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        match modifier {
            Modifier::Ctrl => self.ctrl_key = true,
            Modifier::Alt => self.alt_key = true,
            Modifier::Shift => self.shift_key = true,
            Modifier::Meta => self.meta_key = true,
        }
        self
    }

    pub fn holds(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Ctrl => self.ctrl_key,
            Modifier::Alt => self.alt_key,
            Modifier::Shift => self.shift_key,
            Modifier::Meta => self.meta_key,
        }
    }
}

/// `{url, timestamp, bbox_tree}` as assembled on the page side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub bbox_tree: Option<LayoutNode>,
}

/// A record plus the viewport it was measured against
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub record: CaptureRecord,
    /// Viewport in device pixels, floored
    pub view_rect: BBox,
}

/// Turns qualifying clicks and snapshots into capture records
#[derive(Debug, Clone)]
pub struct CaptureTrigger {
    modifier: Modifier,
    anchor: Anchor,
    root: CaptureRoot,
    max_depth: usize,
    max_nodes: usize,
}

impl Default for CaptureTrigger {
    fn default() -> Self {
        Self {
            modifier: Modifier::default(),
            anchor: Anchor::default(),
            root: CaptureRoot::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

impl CaptureTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn root(mut self, root: CaptureRoot) -> Self {
        self.root = root;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn gate(&self) -> Modifier {
        self.modifier
    }

    pub fn capture_root(&self) -> CaptureRoot {
        self.root
    }

    pub fn node_limit(&self) -> usize {
        self.max_nodes
    }

    /// Primary button with the configured modifier held
    pub fn qualifies(&self, event: &ClickEvent) -> bool {
        event.button == 0 && event.holds(self.modifier)
    }

    /// Build the capture record for a snapshot, stamped now
    pub fn fire(&self, snapshot: &PageSnapshot) -> Capture {
        self.fire_at(snapshot, Utc::now())
    }

    /// Build the capture record for a snapshot with an explicit timestamp
    pub fn fire_at(&self, snapshot: &PageSnapshot, timestamp: DateTime<Utc>) -> Capture {
        if snapshot.truncated {
            tracing::warn!(
                "Snapshot of {} stopped at {} elements; later elements are missing",
                snapshot.metrics.url,
                snapshot.dom.len()
            );
        }

        let viewport = Viewport::from_metrics(&snapshot.metrics, self.anchor);
        let bbox_tree = snapshot.dom.root().and_then(|root| {
            Extractor::new(&snapshot.dom, &viewport)
                .with_max_depth(self.max_depth)
                .extract(root)
        });

        tracing::debug!(
            "Extracted {} of {} elements from {}",
            bbox_tree.as_ref().map(LayoutNode::len).unwrap_or(0),
            snapshot.dom.len(),
            snapshot.metrics.url
        );

        let r = viewport.rect;
        Capture {
            record: CaptureRecord {
                url: snapshot.metrics.url.clone(),
                timestamp,
                bbox_tree,
            },
            view_rect: BBox(
                r.x1.floor() as i64,
                r.y1.floor() as i64,
                r.x2.floor() as i64,
                r.y2.floor() as i64,
            ),
        }
    }

    /// Like [`fire`](Self::fire) but only for qualifying clicks
    pub fn on_click(&self, event: &ClickEvent, snapshot: &PageSnapshot) -> Option<Capture> {
        if self.qualifies(event) {
            Some(self.fire(snapshot))
        } else {
            tracing::trace!("Ignoring click without {:?}", self.modifier);
            None
        }
    }

    /// Page-side listener installed into every document.
    ///
    /// On a qualifying click it takes the snapshot inside the handler and emits
    /// `{event, snapshot}` through the CDP binding `binding`. The click itself
    /// is swallowed so it cannot navigate before the screenshot is taken.
    pub fn listener_script(&self, binding: &str) -> String {
        format!(
            r#"(() => {{
    if (window.__webuicaptureInstalled) return;
    window.__webuicaptureInstalled = true;
    const takeSnapshot = {snapshot};
    document.addEventListener('click', (event) => {{
        if (event.button !== 0 || !event.{modifier}) return;
        event.preventDefault();
        event.stopPropagation();
        const snapshot = takeSnapshot();
        const click = {{
            button: event.button,
            altKey: event.altKey,
            ctrlKey: event.ctrlKey,
            metaKey: event.metaKey,
            shiftKey: event.shiftKey
        }};
        window['{binding}'](JSON.stringify({{ event: click, snapshot: snapshot }}));
    }}, true);
}})();"#,
            snapshot = crate::snapshot::snapshot_function(self.root, self.max_nodes),
            modifier = self.modifier.event_property(),
            binding = binding,
        )
    }
}

/// What the listener script sends through the binding
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerEvent {
    pub event: ClickEvent,
    pub snapshot: PageSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::snapshot::{DomTree, ElementSnapshot, WindowMetrics};

    fn metrics() -> WindowMetrics {
        WindowMetrics {
            url: "https://example.com/page".into(),
            scroll_x: 0.0,
            scroll_y: 0.0,
            inner_width: 1000.0,
            inner_height: 800.0,
            device_pixel_ratio: 1.0,
        }
    }

    fn snapshot(dom: DomTree) -> PageSnapshot {
        PageSnapshot {
            metrics: metrics(),
            dom,
            truncated: false,
        }
    }

    #[test]
    fn test_modifier_gate() {
        let trigger = CaptureTrigger::new();
        assert!(!trigger.qualifies(&ClickEvent::primary()));
        assert!(trigger.qualifies(&ClickEvent::primary().with_modifier(Modifier::Ctrl)));
        assert!(!trigger.qualifies(&ClickEvent::primary().with_modifier(Modifier::Shift)));

        let right = ClickEvent {
            button: 2,
            ctrl_key: true,
            ..Default::default()
        };
        assert!(!trigger.qualifies(&right));

        let alt = CaptureTrigger::new().modifier(Modifier::Alt);
        assert!(alt.qualifies(&ClickEvent::primary().with_modifier(Modifier::Alt)));
        assert!(!alt.qualifies(&ClickEvent::primary().with_modifier(Modifier::Ctrl)));
    }

    #[test]
    fn test_modifier_parse() {
        assert_eq!("ctrl".parse::<Modifier>(), Ok(Modifier::Ctrl));
        assert_eq!("Cmd".parse::<Modifier>(), Ok(Modifier::Meta));
        assert!("hyper".parse::<Modifier>().is_err());
    }

    #[test]
    fn test_fire_assembles_record() {
        let mut dom = DomTree::new();
        let root = dom.push(None, ElementSnapshot::new("BODY", Rect::new(0.0, 0.0, 1000.0, 2000.0)));
        dom.push(Some(root), ElementSnapshot::new("DIV", Rect::new(500.0, 700.0, 1500.0, 900.0)));

        let now = Utc::now();
        let capture = CaptureTrigger::new().fire_at(&snapshot(dom), now);
        assert_eq!(capture.record.url, "https://example.com/page");
        assert_eq!(capture.record.timestamp, now);
        assert_eq!(capture.view_rect, BBox(0, 0, 1000, 800));

        let tree = capture.record.bbox_tree.unwrap();
        assert_eq!(tree.bbox, BBox(0, 0, 1000, 800));
        assert_eq!(tree.children[0].bbox, BBox(500, 700, 1000, 800));
    }

    #[test]
    fn test_invisible_root_gives_null_tree() {
        let mut dom = DomTree::new();
        dom.push(
            None,
            ElementSnapshot::new("HTML", Rect::new(0.0, 0.0, 1000.0, 800.0)).with_display("none"),
        );
        let capture = CaptureTrigger::new().fire(&snapshot(dom));
        assert!(capture.record.bbox_tree.is_none());

        let json = serde_json::to_value(&capture.record).unwrap();
        assert!(json["bbox_tree"].is_null());
    }

    #[test]
    fn test_empty_document_gives_null_tree() {
        let capture = CaptureTrigger::new().fire(&snapshot(DomTree::new()));
        assert!(capture.record.bbox_tree.is_none());
    }

    #[test]
    fn test_on_click_ignores_plain_clicks() {
        let mut dom = DomTree::new();
        dom.push(None, ElementSnapshot::new("HTML", Rect::new(0.0, 0.0, 10.0, 10.0)));
        let snap = snapshot(dom);
        let trigger = CaptureTrigger::new();
        assert!(trigger.on_click(&ClickEvent::primary(), &snap).is_none());
        assert!(trigger
            .on_click(&ClickEvent::primary().with_modifier(Modifier::Ctrl), &snap)
            .is_some());
    }

    #[test]
    fn test_trigger_event_from_binding_payload() {
        let payload = r#"{
            "event": {"button": 0, "altKey": false, "ctrlKey": true, "metaKey": false, "shiftKey": false},
            "snapshot": {
                "metrics": {"url": "about:blank", "scrollX": 0, "scrollY": 0,
                            "innerWidth": 800, "innerHeight": 600, "devicePixelRatio": 1},
                "nodes": [{"tag": "HTML", "parent": null, "rect": [0, 0, 800, 600],
                           "connected": true, "display": "block", "visibility": "visible", "opacity": 1}],
                "truncated": false
            }
        }"#;
        let event: TriggerEvent = serde_json::from_str(payload).unwrap();
        assert!(event.event.ctrl_key);
        assert_eq!(event.snapshot.dom.len(), 1);
    }

    #[test]
    fn test_listener_script_uses_gate_and_binding() {
        let script = CaptureTrigger::new()
            .modifier(Modifier::Shift)
            .listener_script("__emit");
        assert!(script.contains("!event.shiftKey"));
        assert!(script.contains("window['__emit']"));
        assert!(script.contains("getBoundingClientRect"));
    }
}
