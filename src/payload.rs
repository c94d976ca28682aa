//! Capture Payload
//!
//! The combined record sent to the collector, its validation against the
//! screenshot it carries, and the on-disk dataset layout
//! (`<name>.json` + `<name>.png`).

use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::BBox;
use crate::layout::LayoutNode;
use crate::trigger::CaptureRecord;

/// `{url, timestamp, bbox_tree, image}`; `image` travels as bare base64
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturePayload {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub bbox_tree: Option<LayoutNode>,
    #[serde(with = "base64_image")]
    pub image: Vec<u8>,
}

/// The JSON half of a saved capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDocument {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub bbox_tree: Option<LayoutNode>,
    /// `(width, height)` of the saved image
    pub image_size: (u32, u32),
}

impl CaptureDocument {
    /// Load a `<name>.json` written by [`CapturePayload::save_to_dir`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Where a capture was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedCapture {
    pub json_path: PathBuf,
    pub image_path: PathBuf,
}

impl CapturePayload {
    /// Attach raw encoded image bytes to a record
    pub fn new(record: CaptureRecord, image: Vec<u8>) -> Self {
        Self {
            url: record.url,
            timestamp: record.timestamp,
            bbox_tree: record.bbox_tree,
            image,
        }
    }

    /// Pixel dimensions of the attached image, read from its header
    pub fn image_size(&self) -> Result<(u32, u32)> {
        let reader = image::ImageReader::new(Cursor::new(&self.image)).with_guessed_format()?;
        Ok(reader.into_dimensions()?)
    }

    /// Check the payload the way the collector does before accepting it.
    ///
    /// Every box must be ordered, non-negative and inside the image; tags must
    /// be non-blank; the URL must be http(s). Returns the image size.
    pub fn validate(&self) -> Result<(u32, u32)> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| Error::invalid(format!("`url` {:?} is not a valid URL: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid(format!(
                "`url` {:?} must use http or https",
                self.url
            )));
        }

        let (width, height) = self
            .image_size()
            .map_err(|e| Error::invalid(format!("`image` could not be decoded: {}", e)))?;

        if let Some(tree) = &self.bbox_tree {
            for node in tree.iter() {
                validate_node(node, width, height)?;
            }
        }
        Ok((width, height))
    }

    /// Whether the image matches the viewport the tree was measured against.
    ///
    /// A mismatch is logged and otherwise tolerated; geometry and pixels can
    /// come from different frames.
    pub fn check_alignment(&self, view: &BBox) -> bool {
        match self.image_size() {
            Ok((w, h)) if w as i64 == view.width() && h as i64 == view.height() => true,
            Ok((w, h)) => {
                tracing::warn!(
                    "Screenshot is {}x{} but the tree was measured against {}x{}; boxes may be misaligned",
                    w,
                    h,
                    view.width(),
                    view.height()
                );
                false
            }
            Err(e) => {
                tracing::debug!("Could not read screenshot size: {}", e);
                false
            }
        }
    }

    /// JSON document without the image
    pub fn document(&self) -> Result<CaptureDocument> {
        Ok(CaptureDocument {
            url: self.url.clone(),
            timestamp: self.timestamp,
            bbox_tree: self.bbox_tree.clone(),
            image_size: self.image_size()?,
        })
    }

    /// Write `<dir>/<name>.json` and `<dir>/<name>.png` (RGB)
    pub fn save_to_dir(&self, dir: impl AsRef<Path>, name: &str) -> Result<SavedCapture> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let json_path = dir.join(format!("{}.json", name));
        let image_path = dir.join(format!("{}.png", name));

        let document = self.document()?;
        std::fs::write(&json_path, serde_json::to_string_pretty(&document)?)?;

        let decoded = image::load_from_memory(&self.image)?;
        decoded
            .to_rgb8()
            .save_with_format(&image_path, image::ImageFormat::Png)?;

        tracing::debug!("Saved capture of {} to {}", self.url, json_path.display());
        Ok(SavedCapture {
            json_path,
            image_path,
        })
    }
}

fn validate_node(node: &LayoutNode, width: u32, height: u32) -> Result<()> {
    if node.tag.trim().is_empty() {
        return Err(Error::invalid("`tag` must be a non-empty string"));
    }

    let b = node.bbox;
    if !b.is_ordered() {
        return Err(Error::invalid(format!(
            "`bbox` {:?} must satisfy x1 <= x2 and y1 <= y2",
            b
        )));
    }
    if b.x1() < 0 || b.y1() < 0 {
        return Err(Error::invalid(format!("`bbox` {:?} coordinates must be >= 0", b)));
    }
    if b.x2() > width as i64 {
        return Err(Error::invalid(format!(
            "`bbox` x coordinates ({}, {}) must be <= image width {}",
            b.x1(),
            b.x2(),
            width
        )));
    }
    if b.y2() > height as i64 {
        return Err(Error::invalid(format!(
            "`bbox` y coordinates ({}, {}) must be <= image height {}",
            b.y1(),
            b.y2(),
            height
        )));
    }
    Ok(())
}

/// Serde adapter: bytes <-> base64 string, tolerating a data-URI prefix on input
mod base64_image {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(crate::relay::strip_data_uri_prefix(&encoded))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Solid-colour PNG of the given size
    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 200, 200, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn payload(tree: Option<LayoutNode>) -> CapturePayload {
        CapturePayload {
            url: "https://example.com/".into(),
            timestamp: Utc::now(),
            bbox_tree: tree,
            image: png(100, 80),
        }
    }

    #[test]
    fn test_image_size() {
        assert_eq!(payload(None).image_size().unwrap(), (100, 80));
    }

    #[test]
    fn test_check_alignment() {
        let p = payload(None);
        assert!(p.check_alignment(&BBox(0, 0, 100, 80)));
        assert!(p.check_alignment(&BBox(0, 300, 100, 380)));
        assert!(!p.check_alignment(&BBox(0, 0, 200, 160)));
    }

    #[test]
    fn test_validate_accepts_boxes_inside_image() {
        let mut root = LayoutNode::new("BODY", BBox(0, 0, 100, 80));
        root.children.push(LayoutNode::new("DIV", BBox(10, 10, 10, 20)));
        assert_eq!(payload(Some(root)).validate().unwrap(), (100, 80));
        assert!(payload(None).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_image_boxes() {
        let mut root = LayoutNode::new("BODY", BBox(0, 0, 100, 80));
        root.children.push(LayoutNode::new("DIV", BBox(10, 10, 101, 20)));
        let err = payload(Some(root)).validate().unwrap_err();
        assert!(err.to_string().contains("image width 100"));

        let root = LayoutNode::new("BODY", BBox(0, 0, 100, 81));
        assert!(payload(Some(root)).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_boxes_and_tags() {
        let root = LayoutNode::new("BODY", BBox(20, 0, 10, 10));
        assert!(payload(Some(root)).validate().is_err());

        let root = LayoutNode::new("BODY", BBox(-1, 0, 10, 10));
        assert!(payload(Some(root)).validate().is_err());

        let root = LayoutNode::new("  ", BBox(0, 0, 10, 10));
        assert!(payload(Some(root)).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url_and_image() {
        let mut p = payload(None);
        p.url = "not a url".into();
        assert!(p.validate().is_err());
        p.url = "file:///tmp/page.html".into();
        assert!(p.validate().is_err());

        let mut p = payload(None);
        p.image = b"not an image".to_vec();
        assert!(matches!(p.validate(), Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_wire_shape_uses_bare_base64() {
        let p = payload(Some(LayoutNode::new("BODY", BBox(0, 0, 100, 80))));
        let json = serde_json::to_value(&p).unwrap();
        let image = json["image"].as_str().unwrap();
        assert!(image.starts_with("iVBOR"));
        assert_eq!(json["bbox_tree"]["bbox"], serde_json::json!([0, 0, 100, 80]));

        let back: CapturePayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_deserialize_tolerates_data_uri() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(png(4, 4));
        let json = serde_json::json!({
            "url": "https://example.com/",
            "timestamp": "2024-01-01T00:00:00Z",
            "bbox_tree": null,
            "image": format!("data:image/png;base64,{}", encoded),
        });
        let p: CapturePayload = serde_json::from_value(json).unwrap();
        assert_eq!(p.image_size().unwrap(), (4, 4));
    }

    #[test]
    fn test_save_to_dir_writes_json_and_png() {
        let dir = std::env::temp_dir().join(format!("webuicapture-payload-{}", uuid::Uuid::new_v4()));
        let p = payload(Some(LayoutNode::new("BODY", BBox(0, 0, 100, 80))));
        let saved = p.save_to_dir(&dir, "ok").unwrap();

        assert_eq!(saved.json_path, dir.join("ok.json"));
        let doc = CaptureDocument::load(&saved.json_path).unwrap();
        assert_eq!(doc.image_size, (100, 80));
        assert_eq!(doc.bbox_tree, p.bbox_tree);

        let img = image::open(&saved.image_path).unwrap();
        assert_eq!((img.width(), img.height()), (100, 80));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
