//! Geometry and identity primitives shared by the placement engine

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Number of hex characters of the content digest kept in an upload key
const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Rectangle dimensions must be positive (got {width}x{height})")]
    NonPositiveSize { width: f64, height: f64 },

    #[error("Rectangle coordinates must be finite")]
    NonFinite,
}

/// Stable identifier for an open document.
///
/// Placements are keyed by this value, so re-opening the same content must
/// produce the same key while different content must not collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Key a document by its reference (URL, path or data URI)
    pub fn from_reference(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Key an uploaded file by name plus a content fingerprint.
    ///
    /// Two files sharing a name but not content get different keys.
    pub fn for_upload(file_name: &str, bytes: &[u8]) -> Self {
        let digest = hex::encode(Sha256::digest(bytes));
        Self(format!("{}@{}", file_name, &digest[..FINGERPRINT_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Engine-independent name of a placement's form field.
///
/// This is the only identity that survives a reload; engine ids never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldName(String);

impl FieldName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Rectangle in pointer (client) space, pixels with a top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ClientRect {
    /// Rectangle of the given size centered on a point
    pub fn centered_on(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            left: x - width / 2.0,
            top: y - height / 2.0,
            width,
            height,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPageRect {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    page_index: u32,
}

impl TryFrom<RawPageRect> for PageRect {
    type Error = GeometryError;

    fn try_from(raw: RawPageRect) -> Result<Self, Self::Error> {
        PageRect::new(raw.left, raw.top, raw.width, raw.height, raw.page_index)
    }
}

/// Rectangle in page space, as produced by the document engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPageRect")]
pub struct PageRect {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    page_index: u32,
}

impl PageRect {
    /// Build a page rectangle, rejecting empty or non-finite geometry
    pub fn new(
        left: f64,
        top: f64,
        width: f64,
        height: f64,
        page_index: u32,
    ) -> Result<Self, GeometryError> {
        if ![left, top, width, height].iter().all(|v| v.is_finite()) {
            return Err(GeometryError::NonFinite);
        }
        if width <= 0.0 || height <= 0.0 {
            return Err(GeometryError::NonPositiveSize { width, height });
        }
        Ok(Self {
            left,
            top,
            width,
            height,
            page_index,
        })
    }

    pub fn left(&self) -> f64 {
        self.left
    }

    pub fn top(&self) -> f64 {
        self.top
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    /// True when both rectangles sit on the same page and share some area
    pub fn overlaps(&self, other: &PageRect) -> bool {
        if self.page_index != other.page_index {
            return false;
        }
        let self_right = self.left + self.width;
        let self_bottom = self.top + self.height;
        let other_right = other.left + other.width;
        let other_bottom = other.top + other.height;

        !(self_right <= other.left
            || other_right <= self.left
            || self_bottom <= other.top
            || other_bottom <= self.top)
    }
}
