//! Batch processing: decode, predict, partition, evaluate.
//!
//! Every per-image failure is absorbed and recorded as an invalid id; nothing
//! in here aborts a batch.

use crate::metrics;
use crate::pipeline::Predictor;
use crate::types::{BatchResult, ImageRequest, Prediction};
use image::{ImageReader, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Source of decoded images, keyed by request path.
pub trait ImageLoader {
    fn load(&self, path: &str) -> Result<RgbImage, DecodeError>;
}

/// Reads images from the filesystem, sniffing the format from content.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageLoader;

impl ImageLoader for FsImageLoader {
    fn load(&self, path: &str) -> Result<RgbImage, DecodeError> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(image.to_rgb8())
    }
}

/// Run every request through `predictor` in input order.
///
/// Each id lands in exactly one of `image_predictions` / `invalid_predictions`.
/// Metrics are computed over the labeled predictions when at least one exists.
pub fn process_batch<P, L>(predictor: &mut P, loader: &L, images: &[ImageRequest]) -> BatchResult
where
    P: Predictor + ?Sized,
    L: ImageLoader + ?Sized,
{
    let mut image_predictions = Vec::new();
    let mut invalid_predictions = Vec::new();
    let mut metrics_eligible = false;

    for request in images {
        let image = match loader.load(&request.path) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(
                    id = request.id,
                    path = %request.path,
                    error = %e,
                    "unreadable image"
                );
                invalid_predictions.push(request.id);
                continue;
            }
        };

        let Some(predicted_label) = predictor.predict(&image) else {
            tracing::debug!(id = request.id, "no prediction");
            invalid_predictions.push(request.id);
            continue;
        };

        if request.is_labeled() {
            metrics_eligible = true;
        }
        image_predictions.push(Prediction {
            id: request.id,
            predicted_label,
            ground_truth_label: request.label.clone(),
        });
    }

    let metrics = if metrics_eligible {
        let labeled: Vec<Prediction> =
            image_predictions.iter().filter(|p| p.is_labeled()).cloned().collect();
        Some(metrics::aggregate(&labeled))
    } else {
        None
    };

    tracing::info!(
        images = images.len(),
        predictions = image_predictions.len(),
        invalid = invalid_predictions.len(),
        metrics = metrics.is_some(),
        "batch processed"
    );

    BatchResult {
        invalid_predictions,
        image_predictions,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{
        AuthenticityClassifier, ClassificationModel, ClassifierError, LabelOrder,
    };
    use crate::detector::{Candidate, DetectorError, FaceDetectionModel, FaceLocator};
    use crate::metrics::{ClassMetrics, ConfusionMatrix};
    use crate::pipeline::InferencePipeline;
    use crate::types::ClassLabel::{self, Fake, Real};
    use image::Rgb;
    use ndarray::Array4;
    use std::collections::HashMap;

    /// Serves synthetic images by path; unknown paths fail to decode.
    /// The red channel of the image encodes the scenario:
    /// 0 = no face, 1 = "Real" face, 2 = "Fake" face, 3 = classifier failure.
    struct MemoryLoader(HashMap<String, u8>);

    impl MemoryLoader {
        fn new(entries: &[(&str, u8)]) -> Self {
            Self(entries.iter().map(|(p, k)| (p.to_string(), *k)).collect())
        }
    }

    impl ImageLoader for MemoryLoader {
        fn load(&self, path: &str) -> Result<RgbImage, DecodeError> {
            let kind = self.0.get(path).ok_or_else(|| {
                let err = std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string());
                DecodeError::Io(err)
            })?;
            Ok(RgbImage::from_pixel(16, 16, Rgb([*kind, 128, 128])))
        }
    }

    /// Finds a face unless the image encodes "no face".
    struct ScenarioDetector;

    impl FaceDetectionModel for ScenarioDetector {
        fn infer(&mut self, image: &RgbImage) -> Result<Vec<Candidate>, DetectorError> {
            let confidence = if image.get_pixel(0, 0).0[0] == 0 { 0.1 } else { 0.99 };
            Ok(vec![Candidate { confidence, bbox: [0.0, 0.0, 1.0, 1.0] }])
        }
    }

    /// Reads the scenario back out of the normalized face tensor (B, G, R).
    struct ScenarioClassifier;

    impl ClassificationModel for ScenarioClassifier {
        fn scores(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
            let red = (input[[0, 0, 0, 2]] * 128.0).round() as u8;
            match red {
                1 => Ok(vec![0.9, 0.1]),
                2 => Ok(vec![0.2, 0.8]),
                _ => Err(ClassifierError::InferenceFailed("scenario failure".into())),
            }
        }
    }

    fn pipeline() -> InferencePipeline<ScenarioDetector, ScenarioClassifier> {
        InferencePipeline::new(
            FaceLocator::new(ScenarioDetector, 0.56),
            AuthenticityClassifier::new(ScenarioClassifier, LabelOrder::default()),
        )
    }

    fn req(id: i64, path: &str, label: &str) -> ImageRequest {
        ImageRequest {
            id,
            path: path.into(),
            label: label.into(),
        }
    }

    fn loader() -> MemoryLoader {
        MemoryLoader::new(&[
            ("noface.png", 0),
            ("real.png", 1),
            ("fake.png", 2),
            ("broken.png", 3),
        ])
    }

    fn run(images: &[ImageRequest]) -> BatchResult {
        process_batch(&mut pipeline(), &loader(), images)
    }

    fn assert_partition(images: &[ImageRequest], result: &BatchResult) {
        assert_eq!(
            result.invalid_predictions.len() + result.image_predictions.len(),
            images.len()
        );
        let mut seen: Vec<i64> = result
            .invalid_predictions
            .iter()
            .copied()
            .chain(result.image_predictions.iter().map(|p| p.id))
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<i64> = images.iter().map(|r| r.id).collect();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_no_face_is_invalid_and_no_metrics() {
        let images = [req(1, "noface.png", "Real")];
        let result = run(&images);
        assert_eq!(result.invalid_predictions, vec![1]);
        assert!(result.image_predictions.is_empty());
        assert!(result.metrics.is_none());
    }

    #[test]
    fn test_two_correct_real_images() {
        let images = [req(1, "real.png", "Real"), req(2, "real.png", "Real")];
        let result = run(&images);
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.confusion_matrix, ConfusionMatrix([[2, 0], [0, 0]]));
        assert_eq!(
            metrics.class(Real),
            ClassMetrics { precision: 1.0, recall: 1.0, f1: 1.0 }
        );
        assert_eq!(metrics.class(Fake), ClassMetrics::default());
    }

    #[test]
    fn test_fake_predicted_real() {
        let loader = MemoryLoader::new(&[("a.png", 1), ("b.png", 1)]);
        let images = [req(1, "a.png", "Fake"), req(2, "b.png", "Real")];
        let result = process_batch(&mut pipeline(), &loader, &images);

        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.confusion_matrix, ConfusionMatrix([[1, 0], [1, 0]]));
        let real = metrics.class(Real);
        assert!((real.precision - 0.5).abs() < 1e-9);
        assert!((real.recall - 1.0).abs() < 1e-9);
        assert!((real.f1 - 0.67).abs() < 1e-9);
        assert_eq!(metrics.class(Fake).precision, 0.0);
        assert_eq!(metrics.class(Fake).recall, 0.0);
    }

    #[test]
    fn test_metrics_only_over_labeled() {
        let images = [
            req(1, "real.png", ""),
            req(2, "fake.png", "Fake"),
            req(3, "fake.png", ""),
        ];
        let result = run(&images);
        assert_eq!(result.image_predictions.len(), 3);
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.valid_ids, vec![2]);
        assert_eq!(metrics.confusion_matrix.total(), 1);
    }

    #[test]
    fn test_missing_path_is_invalid_only() {
        let images = [
            req(1, "real.png", "Real"),
            req(2, "does-not-exist.png", "Real"),
            req(3, "fake.png", "Fake"),
        ];
        let result = run(&images);
        assert_eq!(result.invalid_predictions, vec![2]);
        let ids: Vec<i64> = result.image_predictions.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(result.metrics.unwrap().valid_ids, vec![1, 3]);
    }

    #[test]
    fn test_classifier_failure_is_invalid() {
        let images = [req(1, "broken.png", "Fake"), req(2, "fake.png", "")];
        let result = run(&images);
        assert_eq!(result.invalid_predictions, vec![1]);
        assert_eq!(result.image_predictions[0].predicted_label, Fake);
        assert!(result.metrics.is_none());
    }

    #[test]
    fn test_partition_and_order_preserved() {
        let images = [
            req(10, "fake.png", "Fake"),
            req(11, "missing.png", ""),
            req(12, "noface.png", "Real"),
            req(13, "real.png", ""),
            req(14, "broken.png", ""),
            req(15, "real.png", "Fake"),
        ];
        let result = run(&images);
        assert_partition(&images, &result);
        assert_eq!(result.invalid_predictions, vec![11, 12, 14]);
        let predicted: Vec<(i64, ClassLabel)> = result
            .image_predictions
            .iter()
            .map(|p| (p.id, p.predicted_label))
            .collect();
        assert_eq!(predicted, vec![(10, Fake), (13, Real), (15, Real)]);

        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.valid_ids, vec![10, 15]);
        assert_eq!(metrics.confusion_matrix.total() as usize, metrics.valid_ids.len());
    }

    #[test]
    fn test_unlabeled_batch_has_no_metrics() {
        let images = [req(1, "real.png", ""), req(2, "fake.png", "")];
        let result = run(&images);
        assert_eq!(result.image_predictions.len(), 2);
        assert!(result.metrics.is_none());
    }

    #[test]
    fn test_empty_batch() {
        let result = run(&[]);
        assert!(result.invalid_predictions.is_empty());
        assert!(result.image_predictions.is_empty());
        assert!(result.metrics.is_none());
    }

    #[test]
    fn test_idempotent() {
        let images = [
            req(1, "real.png", "Real"),
            req(2, "fake.png", "Real"),
            req(3, "noface.png", ""),
        ];
        let mut p = pipeline();
        let first = process_batch(&mut p, &loader(), &images);
        let second = process_batch(&mut p, &loader(), &images);
        assert_eq!(first, second);
    }

    #[test]
    fn test_result_json_shape() {
        let result = run(&[req(1, "noface.png", ""), req(2, "real.png", "Real")]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["invalidPredictions"], serde_json::json!([1]));
        assert_eq!(
            json["imagePredictions"],
            serde_json::json!([{"id": 2, "predictedLabel": "Real", "groundTruthLabel": "Real"}])
        );
        assert_eq!(json["metrics"]["validIds"], serde_json::json!([2]));

        let unlabeled = run(&[req(1, "real.png", "")]);
        assert!(serde_json::to_value(&unlabeled).unwrap()["metrics"].is_null());
    }

    #[test]
    fn test_fs_loader_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.jpg");
        assert!(matches!(
            FsImageLoader.load(path.to_str().unwrap()),
            Err(DecodeError::Io(_))
        ));
    }

    #[test]
    fn test_fs_loader_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert!(FsImageLoader.load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_fs_loader_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        RgbImage::from_pixel(4, 3, Rgb([1, 2, 3])).save(&path).unwrap();

        let image = FsImageLoader.load(path.to_str().unwrap()).unwrap();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(*image.get_pixel(0, 0), Rgb([1, 2, 3]));
    }

    #[test]
    fn test_fs_loader_in_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("real.png");
        RgbImage::from_pixel(8, 8, Rgb([1, 128, 128])).save(&good).unwrap();
        let missing = dir.path().join("missing.png");

        let images = [
            req(1, good.to_str().unwrap(), "Real"),
            req(2, missing.to_str().unwrap(), "Real"),
        ];
        let result = process_batch(&mut pipeline(), &FsImageLoader, &images);
        assert_eq!(result.invalid_predictions, vec![2]);
        assert_eq!(result.image_predictions[0].predicted_label, Real);
    }
}
