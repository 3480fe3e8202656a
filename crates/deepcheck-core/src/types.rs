use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::metrics::MetricsReport;

/// Authenticity class assigned to a face.
///
/// The derived ordering (`Real` < `Fake`) is the fixed row/column order of the
/// confusion matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassLabel {
    Real,
    Fake,
}

impl ClassLabel {
    /// Both classes in confusion-matrix order.
    pub const ALL: [ClassLabel; 2] = [ClassLabel::Real, ClassLabel::Fake];

    /// Row/column index in the confusion matrix (Real=0, Fake=1).
    pub fn index(self) -> usize {
        match self {
            ClassLabel::Real => 0,
            ClassLabel::Fake => 1,
        }
    }

    /// Translate a classifier class code: 0 is genuine, anything else is manipulated.
    pub fn from_class_code(code: i64) -> Self {
        if code == 0 {
            ClassLabel::Real
        } else {
            ClassLabel::Fake
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClassLabel::Real => "Real",
            ClassLabel::Fake => "Fake",
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown class label: {0:?} (expected \"Real\" or \"Fake\")")]
pub struct UnknownLabel(pub String);

impl FromStr for ClassLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Real" => Ok(ClassLabel::Real),
            "Fake" => Ok(ClassLabel::Fake),
            other => Err(UnknownLabel(other.to_string())),
        }
    }
}

/// Face bounding box in original-image pixel coordinates.
///
/// Coordinates are truncated from the rescaled model output and may fall
/// outside the image; see [`BoundingBox::clamp_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl BoundingBox {
    /// Clamp the box to a `width` × `height` image.
    ///
    /// Returns `(x, y, w, h)` of the visible region, or `None` when nothing
    /// of the box remains inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp = |v: i32, max: u32| v.clamp(0, max as i32) as u32;
        let x0 = clamp(self.x0, width);
        let y0 = clamp(self.y0, height);
        let x1 = clamp(self.x1, width);
        let y1 = clamp(self.y1, height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// One detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    /// Model confidence in [0, 1].
    pub confidence: f32,
}

/// Whether the face locator keeps only the most confident candidate or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionMode {
    #[default]
    Single,
    Multiple,
}

/// One image to evaluate. An empty `label` means "no ground truth".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    #[serde(alias = "UUID")]
    pub id: i64,
    pub path: String,
    pub label: String,
}

impl ImageRequest {
    pub fn is_labeled(&self) -> bool {
        !self.label.is_empty()
    }
}

/// Batch request body: `{ "images": [ { "id", "path", "label" } ] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub images: Vec<ImageRequest>,
}

/// A successfully classified image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub id: i64,
    pub predicted_label: ClassLabel,
    pub ground_truth_label: String,
}

impl Prediction {
    pub fn is_labeled(&self) -> bool {
        !self.ground_truth_label.is_empty()
    }
}

/// Id of an image that produced no prediction.
pub type InvalidEntry = i64;

/// Outcome of one batch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub invalid_predictions: Vec<InvalidEntry>,
    pub image_predictions: Vec<Prediction>,
    pub metrics: Option<MetricsReport>,
}
