//! Geometry Utilities
//!
//! Axis-aligned rectangles in a single coordinate space, the intersection test
//! used for viewport pruning, device-pixel scaling and integer clipping.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle `(x1, y1, x2, y2)`.
///
/// Nothing forces `x1 <= x2` here; rectangles read from the page can be
/// degenerate until they are clipped.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// True when the rectangle covers no area (or holds NaN coordinates)
    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    /// Shift by `(dx, dy)`
    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }
}

impl From<[f64; 4]> for Rect {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<Rect> for [f64; 4] {
    fn from(r: Rect) -> Self {
        [r.x1, r.y1, r.x2, r.y2]
    }
}

/// Clipped integer bounding box in device pixels, serialized as `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BBox(pub i64, pub i64, pub i64, pub i64);

impl BBox {
    pub fn x1(&self) -> i64 {
        self.0
    }

    pub fn y1(&self) -> i64 {
        self.1
    }

    pub fn x2(&self) -> i64 {
        self.2
    }

    pub fn y2(&self) -> i64 {
        self.3
    }

    pub fn width(&self) -> i64 {
        self.2 - self.0
    }

    pub fn height(&self) -> i64 {
        self.3 - self.1
    }

    /// Whether `x1 <= x2` and `y1 <= y2`
    pub fn is_ordered(&self) -> bool {
        self.0 <= self.2 && self.1 <= self.3
    }

    /// Whether this box lies inside `outer` (edges inclusive)
    pub fn within(&self, outer: &Rect) -> bool {
        self.0 as f64 >= outer.x1
            && self.1 as f64 >= outer.y1
            && self.2 as f64 <= outer.x2
            && self.3 as f64 <= outer.y2
    }
}

/// Closed-interval intersection test.
///
/// Rectangles that only touch along an edge or a corner intersect.
pub fn intersects(a: &Rect, b: &Rect) -> bool {
    if a.x2 < b.x1 || b.x2 < a.x1 {
        return false;
    }
    if a.y2 < b.y1 || b.y2 < a.y1 {
        return false;
    }
    true
}

/// Scale every coordinate by the device pixel ratio
pub fn to_device_pixels(rect: &Rect, pixel_ratio: f64) -> Rect {
    Rect::new(
        rect.x1 * pixel_ratio,
        rect.y1 * pixel_ratio,
        rect.x2 * pixel_ratio,
        rect.y2 * pixel_ratio,
    )
}

/// Clamp `rect` into `viewport` and floor to whole pixels.
///
/// Callers must have checked [`intersects`] first; clipping a disjoint
/// rectangle yields an inverted box.
pub fn clip(rect: &Rect, viewport: &Rect) -> BBox {
    BBox(
        rect.x1.max(viewport.x1).floor() as i64,
        rect.y1.max(viewport.y1).floor() as i64,
        rect.x2.min(viewport.x2).floor() as i64,
        rect.y2.min(viewport.y2).floor() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rects() -> Vec<Rect> {
        let coords = [-50.0, 0.0, 10.0, 99.5, 100.0, 250.0];
        let mut rects = Vec::new();
        for &x1 in &coords {
            for &y1 in &coords {
                for (w, h) in [(0.0, 0.0), (10.0, 5.0), (100.0, 0.0), (300.0, 300.0)] {
                    rects.push(Rect::new(x1, y1, x1 + w, y1 + h));
                }
            }
        }
        rects
    }

    #[test]
    fn test_intersects_is_commutative() {
        let rects = sample_rects();
        for a in &rects {
            for b in &rects {
                assert_eq!(intersects(a, b), intersects(b, a), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_intersects_touching_edges() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(intersects(&a, &Rect::new(10.0, 0.0, 20.0, 10.0)));
        assert!(intersects(&a, &Rect::new(0.0, 10.0, 10.0, 20.0)));
        assert!(intersects(&a, &Rect::new(10.0, 10.0, 20.0, 20.0)));
        assert!(!intersects(&a, &Rect::new(10.5, 0.0, 20.0, 10.0)));
    }

    #[test]
    fn test_intersects_disjoint_axes() {
        let viewport = Rect::new(0.0, 0.0, 1000.0, 800.0);
        assert!(!intersects(&Rect::new(0.0, -200.0, 100.0, -50.0), &viewport));
        assert!(!intersects(&Rect::new(1001.0, 0.0, 1100.0, 10.0), &viewport));
        assert!(!intersects(&Rect::new(0.0, 801.0, 10.0, 900.0), &viewport));
        assert!(intersects(&Rect::new(-10.0, -10.0, 2000.0, 2000.0), &viewport));
    }

    #[test]
    fn test_to_device_pixels() {
        let r = Rect::new(1.5, 2.0, 10.0, 20.25);
        assert_eq!(to_device_pixels(&r, 2.0), Rect::new(3.0, 4.0, 20.0, 40.5));
        assert_eq!(to_device_pixels(&r, 1.0), r);
        assert_eq!(
            to_device_pixels(&Rect::new(10.0, 10.0, 20.0, 20.0), 0.5),
            Rect::new(5.0, 5.0, 10.0, 10.0)
        );
    }

    #[test]
    fn test_clip_and_floor() {
        let viewport = Rect::new(0.0, 0.0, 1000.0, 800.0);
        let bbox = clip(&Rect::new(500.0, 700.0, 1500.0, 900.0), &viewport);
        assert_eq!(bbox, BBox(500, 700, 1000, 800));

        let bbox = clip(&Rect::new(10.7, 20.2, 30.9, 40.999), &viewport);
        assert_eq!(bbox, BBox(10, 20, 30, 40));
        assert!(bbox.is_ordered());
        assert!(bbox.within(&viewport));
    }

    #[test]
    fn test_is_empty() {
        assert!(Rect::new(5.0, 5.0, 5.0, 10.0).is_empty());
        assert!(Rect::new(5.0, 5.0, 10.0, 5.0).is_empty());
        assert!(Rect::new(5.0, 5.0, f64::NAN, 10.0).is_empty());
        assert!(!Rect::new(5.0, 5.0, 6.0, 6.0).is_empty());
    }

    #[test]
    fn test_serde_shapes() {
        let rect: Rect = serde_json::from_str("[1.0, 2.0, 3.5, 4]").unwrap();
        assert_eq!(rect, Rect::new(1.0, 2.0, 3.5, 4.0));
        assert_eq!(
            serde_json::to_string(&BBox(1, 2, 3, 4)).unwrap(),
            "[1,2,3,4]"
        );
    }
}
