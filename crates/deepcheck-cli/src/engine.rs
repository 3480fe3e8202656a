use crate::config::Config;
use deepcheck_core::batch::{DecodeError, FsImageLoader, ImageLoader};
use deepcheck_core::classifier::{ClassifierError, LabelOrderError};
use deepcheck_core::detector::DetectorError;
use deepcheck_core::{
    process_batch, AuthenticityClassifier, BatchResult, ClassLabel, Detection, DetectionMode,
    FaceLocator, ImageRequest, LabelOrder, OnnxClassifier, OnnxPipeline, Predictor, SsdFaceDetector,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("label order error: {0}")]
    Labels(#[from] LabelOrderError),
    #[error("cannot read image: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the CLI to the engine thread.
enum EngineRequest {
    Batch {
        images: Vec<ImageRequest>,
        reply: oneshot::Sender<BatchResult>,
    },
    Predict {
        path: String,
        reply: oneshot::Sender<Result<Option<ClassLabel>, EngineError>>,
    },
    Detect {
        path: String,
        mode: DetectionMode,
        reply: oneshot::Sender<Result<Vec<Detection>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Evaluate one batch. Per-image failures are part of the result.
    pub async fn process_batch(
        &self,
        images: Vec<ImageRequest>,
    ) -> Result<BatchResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Batch {
                images,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Classify a single image file. `Ok(None)` means no face or no prediction.
    pub async fn predict(&self, path: String) -> Result<Option<ClassLabel>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Predict {
                path,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run only the face locator over an image file.
    pub async fn detect(
        &self,
        path: String,
        mode: DetectionMode,
    ) -> Result<Vec<Detection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                path,
                mode,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models and the label order, then enters a request loop
/// that handles one request start-to-finish before the next. Fails fast at
/// startup if any model is unavailable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let detector_path = config.detector_model_path();
    let detector = SsdFaceDetector::load(&detector_path, config.intra_threads)?;
    tracing::info!(path = %detector_path, "face detector loaded");

    let classifier_path = config.classifier_model_path();
    let classifier = OnnxClassifier::load(&classifier_path, config.intra_threads)?;
    tracing::info!(path = %classifier_path, "authenticity classifier loaded");

    let labels = LabelOrder::load_or_default(&config.labels_path())?;

    let mut pipeline = OnnxPipeline::new(
        FaceLocator::new(detector, config.face_confidence),
        AuthenticityClassifier::new(classifier, labels),
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("deepcheck-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let loader = FsImageLoader;
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Batch { images, reply } => {
                        let result = process_batch(&mut pipeline, &loader, &images);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Predict { path, reply } => {
                        let result = loader
                            .load(&path)
                            .map(|image| pipeline.predict(&image))
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Detect { path, mode, reply } => {
                        let result = run_detect(&mut pipeline, &loader, &path, mode);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_detect(
    pipeline: &mut OnnxPipeline,
    loader: &FsImageLoader,
    path: &str,
    mode: DetectionMode,
) -> Result<Vec<Detection>, EngineError> {
    let image = loader.load(path)?;
    let detections = pipeline.locator_mut().detect_faces(&image, mode)?;
    tracing::debug!(path, faces = detections.len(), "detect: done");
    Ok(detections)
}
