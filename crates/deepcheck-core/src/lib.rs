//! deepcheck-core: face authenticity inference and batch evaluation.
//!
//! Uses an SSD face detector and a binary authenticity classifier, both
//! running via ONNX Runtime, and scores batches against ground-truth labels.

pub mod batch;
pub mod classifier;
pub mod detector;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod types;

pub use batch::{process_batch, DecodeError, FsImageLoader, ImageLoader};
pub use classifier::{AuthenticityClassifier, LabelOrder, OnnxClassifier};
pub use detector::{FaceLocator, SsdFaceDetector, DEFAULT_FACE_CONFIDENCE};
pub use metrics::{ClassMetrics, ConfusionMatrix, MetricsReport};
pub use pipeline::{InferencePipeline, OnnxPipeline, Predictor};
pub use types::{
    BatchRequest, BatchResult, BoundingBox, ClassLabel, Detection, DetectionMode, ImageRequest,
    InvalidEntry, Prediction,
};
