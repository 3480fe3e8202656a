//! SSD face detector via ONNX Runtime, and the face locator policy on top of it.
//!
//! The detector is a ResNet-10 SSD (300×300 input) that emits one row per
//! candidate: `[image_id, class_id, confidence, x0, y0, x1, y1]` with box
//! coordinates normalized to [0, 1]. Selection, thresholding and rescaling
//! happen in [`FaceLocator`], so they can be exercised with any
//! [`FaceDetectionModel`].

use crate::types::{BoundingBox, Detection, DetectionMode};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SSD_INPUT_SIZE: u32 = 300;
/// Per-channel means subtracted in B, G, R order.
const SSD_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];
const SSD_ROW_LEN: usize = 7;
const SSD_CONFIDENCE_COL: usize = 2;
const SSD_BOX_COL: usize = 3;

/// Minimum confidence for a candidate to count as a face.
pub const DEFAULT_FACE_CONFIDENCE: f32 = 0.56;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Raw detection candidate, box normalized to [0, 1] as `[x0, y0, x1, y1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub confidence: f32,
    pub bbox: [f32; 4],
}

/// A face detection model: image in, unfiltered candidates out.
pub trait FaceDetectionModel {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<Candidate>, DetectorError>;
}

/// ResNet-10 SSD face detector.
pub struct SsdFaceDetector {
    session: Session,
}

impl SsdFaceDetector {
    /// Load the SSD ONNX model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded SSD face detector"
        );

        Ok(Self { session })
    }

    /// Resize the whole image to 300×300 and build a BGR NCHW tensor with
    /// the per-channel means subtracted (scale 1.0).
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let size = SSD_INPUT_SIZE as usize;
        let resized = imageops::resize(image, SSD_INPUT_SIZE, SSD_INPUT_SIZE, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = b as f32 - SSD_MEAN_BGR[0];
            tensor[[0, 1, y, x]] = g as f32 - SSD_MEAN_BGR[1];
            tensor[[0, 2, y, x]] = r as f32 - SSD_MEAN_BGR[2];
        }

        tensor
    }
}

impl FaceDetectionModel for SsdFaceDetector {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<Candidate>, DetectorError> {
        let input = Self::preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detections: {e}")))?;

        decode_candidates(raw)
    }
}

/// Split the flat `[1, 1, N, 7]` SSD output into candidates.
fn decode_candidates(raw: &[f32]) -> Result<Vec<Candidate>, DetectorError> {
    if raw.len() % SSD_ROW_LEN != 0 {
        return Err(DetectorError::InferenceFailed(format!(
            "SSD output length {} is not a multiple of {SSD_ROW_LEN}",
            raw.len()
        )));
    }

    Ok(raw
        .chunks_exact(SSD_ROW_LEN)
        .map(|row| Candidate {
            confidence: row[SSD_CONFIDENCE_COL],
            bbox: [
                row[SSD_BOX_COL],
                row[SSD_BOX_COL + 1],
                row[SSD_BOX_COL + 2],
                row[SSD_BOX_COL + 3],
            ],
        })
        .collect())
}

/// Apply the locator policy to raw candidates.
///
/// The globally most confident candidate is found first. In single mode only
/// that candidate is considered, in multiple mode all of them are, in model
/// order. A candidate survives when `confidence >= threshold`; its box is
/// scaled by `[w, h, w, h]` and truncated to integers.
pub fn select_detections(
    candidates: &[Candidate],
    width: u32,
    height: u32,
    threshold: f32,
    mode: DetectionMode,
) -> Vec<Detection> {
    let Some(best) = argmax_confidence(candidates) else {
        return Vec::new();
    };

    let considered = match mode {
        DetectionMode::Single => &candidates[best..=best],
        DetectionMode::Multiple => candidates,
    };

    let (w, h) = (width as f32, height as f32);
    considered
        .iter()
        .filter(|c| c.confidence >= threshold)
        .map(|c| Detection {
            bounding_box: BoundingBox {
                x0: (c.bbox[0] * w) as i32,
                y0: (c.bbox[1] * h) as i32,
                x1: (c.bbox[2] * w) as i32,
                y1: (c.bbox[3] * h) as i32,
            },
            confidence: c.confidence,
        })
        .collect()
}

/// Index of the first candidate holding the maximum confidence.
fn argmax_confidence(candidates: &[Candidate]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, c) in candidates.iter().enumerate() {
        match best {
            Some(b) if c.confidence <= candidates[b].confidence => {}
            _ => best = Some(i),
        }
    }
    best
}

/// A detected face cropped out of its source image.
#[derive(Debug, Clone)]
pub struct LocatedFace {
    pub face: RgbImage,
    pub detection: Detection,
}

/// Finds faces in an image with a detection model and a fixed confidence threshold.
pub struct FaceLocator<M> {
    model: M,
    threshold: f32,
}

impl<M: FaceDetectionModel> FaceLocator<M> {
    pub fn new(model: M, threshold: f32) -> Self {
        Self { model, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Detect faces, returning boxes in original-image pixel coordinates.
    pub fn detect_faces(
        &mut self,
        image: &RgbImage,
        mode: DetectionMode,
    ) -> Result<Vec<Detection>, DetectorError> {
        let candidates = self.model.infer(image)?;
        let detections =
            select_detections(&candidates, image.width(), image.height(), self.threshold, mode);

        tracing::debug!(
            candidates = candidates.len(),
            kept = detections.len(),
            ?mode,
            "face detection"
        );

        Ok(detections)
    }

    /// Detect faces and crop each one out of the image.
    ///
    /// Boxes are clamped to the image; a box with no visible area is dropped.
    pub fn locate(
        &mut self,
        image: &RgbImage,
        mode: DetectionMode,
    ) -> Result<Vec<LocatedFace>, DetectorError> {
        let detections = self.detect_faces(image, mode)?;

        Ok(detections
            .into_iter()
            .filter_map(|detection| {
                let bbox = detection.bounding_box;
                let Some((x, y, w, h)) = bbox.clamp_to(image.width(), image.height()) else {
                    tracing::debug!(?bbox, "dropping face box outside image");
                    return None;
                };
                let face = imageops::crop_imm(image, x, y, w, h).to_image();
                Some(LocatedFace { face, detection })
            })
            .collect())
    }
}
