//! Capture Annotation
//!
//! Draws every box of a layout tree onto the captured screenshot so a capture
//! can be checked by eye. Requires the `annotate` feature to be enabled.

#[cfg(feature = "annotate")]
use image::{Rgba, RgbaImage};

#[cfg(feature = "annotate")]
use imageproc::drawing::draw_hollow_rect_mut;

#[cfg(feature = "annotate")]
use imageproc::rect::Rect;

use crate::geometry::BBox;
use crate::layout::LayoutNode;

/// One box to draw, in tree pre-order
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedBox<'a> {
    /// Pre-order position in the tree (0 is the root)
    pub index: usize,
    pub depth: usize,
    pub tag: &'a str,
    pub bbox: BBox,
}

impl AnnotatedBox<'_> {
    /// Whether the box covers any pixels at all
    pub fn is_drawable(&self) -> bool {
        self.bbox.width() > 0 && self.bbox.height() > 0
    }
}

/// Flatten a tree into drawable boxes, parents before children
pub fn collect_boxes(tree: &LayoutNode) -> Vec<AnnotatedBox<'_>> {
    let mut out = Vec::with_capacity(tree.len());
    let mut stack = vec![(tree, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        out.push(AnnotatedBox {
            index: out.len(),
            depth,
            tag: &node.tag,
            bbox: node.bbox,
        });
        for child in node.children.iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    out
}

/// Annotation configuration
#[derive(Debug, Clone)]
pub struct AnnotationConfig {
    /// Box line color (RGBA)
    pub box_color: [u8; 4],
    /// Label background color (RGBA)
    pub label_bg_color: [u8; 4],
    /// Label text color (RGBA)
    pub label_text_color: [u8; 4],
    /// Box line thickness
    pub line_thickness: u32,
    /// Print each box's pre-order index at its top-left corner
    pub numbered: bool,
    /// Label padding
    pub label_padding: u32,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            box_color: [255, 0, 0, 255],
            label_bg_color: [255, 0, 0, 220],
            label_text_color: [255, 255, 255, 255],
            line_thickness: 2,
            numbered: false,
            label_padding: 2,
        }
    }
}

/// Draw the tree's boxes onto an encoded screenshot; returns PNG bytes
#[cfg(feature = "annotate")]
pub fn annotate_capture(
    image_data: &[u8],
    tree: Option<&LayoutNode>,
    config: &AnnotationConfig,
) -> Result<Vec<u8>, AnnotationError> {
    let img =
        image::load_from_memory(image_data).map_err(|e| AnnotationError::ImageLoad(e.to_string()))?;
    let mut rgba = img.to_rgba8();

    let box_color = Rgba(config.box_color);
    let label_bg = Rgba(config.label_bg_color);
    let label_text = Rgba(config.label_text_color);

    let boxes = tree.map(collect_boxes).unwrap_or_default();
    for b in &boxes {
        if b.is_drawable() {
            draw_thick_rect(&mut rgba, b.bbox, config.line_thickness.max(1), box_color);
        }

        if config.numbered {
            let label = b.index.to_string();
            let label_width = label.len() as u32 * 8 + config.label_padding * 2;
            let label_height = 7 + config.label_padding * 2;
            let x = b.bbox.x1().max(0) as u32;
            let y = b.bbox.y1().max(0) as u32;

            draw_filled_rect(&mut rgba, x, y, label_width, label_height, label_bg);
            draw_number_text(
                &mut rgba,
                x + config.label_padding,
                y + config.label_padding,
                &label,
                label_text,
            );
        }
    }
    tracing::debug!("Annotated {} boxes", boxes.len());

    let mut output = std::io::Cursor::new(Vec::new());
    rgba.write_to(&mut output, image::ImageFormat::Png)
        .map_err(|e| AnnotationError::ImageEncode(e.to_string()))?;

    Ok(output.into_inner())
}

/// Hollow rectangle grown inwards to `thickness` pixels
#[cfg(feature = "annotate")]
fn draw_thick_rect(img: &mut RgbaImage, bbox: BBox, thickness: u32, color: Rgba<u8>) {
    for t in 0..thickness as i64 {
        let w = bbox.width() - 2 * t;
        let h = bbox.height() - 2 * t;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at((bbox.x1() + t) as i32, (bbox.y1() + t) as i32).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// Simple 5x7 pixel font for digits 0-9
#[cfg(feature = "annotate")]
const DIGIT_PATTERNS: [[u8; 7]; 10] = [
    [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
    [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
    [0b01110, 0b10001, 0b00001, 0b00110, 0b01000, 0b10000, 0b11111],
    [0b01110, 0b10001, 0b00001, 0b00110, 0b00001, 0b10001, 0b01110],
    [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
    [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
    [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
    [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
    [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
    [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
];

#[cfg(feature = "annotate")]
fn draw_number_text(img: &mut RgbaImage, x: u32, y: u32, text: &str, color: Rgba<u8>) {
    let mut cx = x;
    for digit in text.chars().filter_map(|c| c.to_digit(10)) {
        for (row, &bits) in DIGIT_PATTERNS[digit as usize].iter().enumerate() {
            for col in 0..5 {
                if (bits >> (4 - col)) & 1 == 1 {
                    put_clipped(img, cx + col, y + row as u32, color);
                }
            }
        }
        cx += 8;
    }
}

#[cfg(feature = "annotate")]
fn draw_filled_rect(img: &mut RgbaImage, x: u32, y: u32, width: u32, height: u32, color: Rgba<u8>) {
    for dy in 0..height {
        for dx in 0..width {
            put_clipped(img, x + dx, y + dy, color);
        }
    }
}

#[cfg(feature = "annotate")]
fn put_clipped(img: &mut RgbaImage, x: u32, y: u32, color: Rgba<u8>) {
    if x < img.width() && y < img.height() {
        img.put_pixel(x, y, color);
    }
}

/// Annotation error
#[derive(Debug)]
pub enum AnnotationError {
    ImageLoad(String),
    ImageEncode(String),
    Disabled,
}

impl std::fmt::Display for AnnotationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotationError::ImageLoad(e) => write!(f, "Failed to load image: {}", e),
            AnnotationError::ImageEncode(e) => write!(f, "Failed to encode image: {}", e),
            AnnotationError::Disabled => write!(
                f,
                "annotate feature not enabled - rebuild with `--features annotate`"
            ),
        }
    }
}

impl std::error::Error for AnnotationError {}

/// Stub for when annotate feature is not enabled
#[cfg(not(feature = "annotate"))]
pub fn annotate_capture(
    _image_data: &[u8],
    _tree: Option<&LayoutNode>,
    _config: &AnnotationConfig,
) -> Result<Vec<u8>, AnnotationError> {
    Err(AnnotationError::Disabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> LayoutNode {
        let mut root = LayoutNode::new("HTML", BBox(0, 0, 40, 30));
        let mut body = LayoutNode::new("BODY", BBox(2, 2, 38, 28));
        body.children.push(LayoutNode::new("DIV", BBox(5, 5, 5, 20)));
        root.children.push(body);
        root.children.push(LayoutNode::new("FOOTER", BBox(0, 25, 40, 30)));
        root
    }

    #[test]
    fn test_collect_boxes_pre_order() {
        let t = tree();
        let boxes = collect_boxes(&t);
        let tags: Vec<_> = boxes.iter().map(|b| b.tag).collect();
        assert_eq!(tags, vec!["HTML", "BODY", "DIV", "FOOTER"]);
        let depths: Vec<_> = boxes.iter().map(|b| b.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 1]);
        assert_eq!(boxes[3].index, 3);
        assert!(!boxes[2].is_drawable());
    }

    #[cfg(feature = "annotate")]
    #[test]
    fn test_annotate_draws_box_edges() {
        let png = crate::payload::tests::png(40, 30);
        let config = AnnotationConfig::default();
        let out = annotate_capture(&png, Some(&tree()), &config).unwrap();
        let img = image::load_from_memory(&out).unwrap().to_rgba8();

        assert_eq!(img.dimensions(), (40, 30));
        assert_eq!(img.get_pixel(0, 0).0, config.box_color);
        assert_eq!(img.get_pixel(2, 15).0, config.box_color);
        assert_eq!(img.get_pixel(20, 15).0, [200, 200, 200, 255]);
    }

    #[cfg(feature = "annotate")]
    #[test]
    fn test_annotate_without_tree_keeps_pixels() {
        let png = crate::payload::tests::png(8, 8);
        let out = annotate_capture(&png, None, &AnnotationConfig::default()).unwrap();
        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        assert!(img.pixels().all(|p| p.0 == [200, 200, 200, 255]));
    }

    #[cfg(not(feature = "annotate"))]
    #[test]
    fn test_stub_reports_disabled() {
        let err = annotate_capture(&[], None, &AnnotationConfig::default()).unwrap_err();
        assert!(matches!(err, AnnotationError::Disabled));
    }
}
