//! Single-image inference: locate → normalize → classify.

use crate::classifier::{AuthenticityClassifier, ClassificationModel, OnnxClassifier};
use crate::detector::{FaceDetectionModel, FaceLocator, SsdFaceDetector};
use crate::normalizer::normalize_face;
use crate::types::{ClassLabel, DetectionMode};
use image::RgbImage;

/// Anything that can turn a decoded image into an authenticity label.
pub trait Predictor {
    /// `None` means no prediction: no face was found or inference failed.
    fn predict(&mut self, image: &RgbImage) -> Option<ClassLabel>;
}

/// Strict composition of the face locator (single-face mode), the
/// normalizer and the classifier. Never retries, never looks at more than
/// one face.
pub struct InferencePipeline<D, C> {
    locator: FaceLocator<D>,
    classifier: AuthenticityClassifier<C>,
}

/// Pipeline backed by the ONNX models.
pub type OnnxPipeline = InferencePipeline<SsdFaceDetector, OnnxClassifier>;

impl<D: FaceDetectionModel, C: ClassificationModel> InferencePipeline<D, C> {
    pub fn new(locator: FaceLocator<D>, classifier: AuthenticityClassifier<C>) -> Self {
        Self { locator, classifier }
    }

    pub fn locator_mut(&mut self) -> &mut FaceLocator<D> {
        &mut self.locator
    }
}

impl<D: FaceDetectionModel, C: ClassificationModel> Predictor for InferencePipeline<D, C> {
    fn predict(&mut self, image: &RgbImage) -> Option<ClassLabel> {
        let faces = match self.locator.locate(image, DetectionMode::Single) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                return None;
            }
        };

        let Some(located) = faces.into_iter().next() else {
            tracing::debug!("no face above threshold");
            return None;
        };

        let tensor = normalize_face(&located.face);
        let label = self.classifier.classify(&tensor)?;

        tracing::debug!(
            %label,
            confidence = located.detection.confidence,
            bbox = ?located.detection.bounding_box,
            "face classified"
        );
        Some(label)
    }
}
