//! Authenticity classifier via ONNX Runtime.
//!
//! A small binary CNN over 32×32 normalized faces. The model emits one score
//! per class; the highest-scoring output index is mapped through the
//! [`LabelOrder`] resolved at startup to a [`ClassLabel`].

use crate::types::ClassLabel;
use ndarray::{Array3, Array4, Axis};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),
    #[error("output index {index} has no entry in the label order ({len} classes)")]
    UnknownClassIndex { index: usize, len: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum LabelOrderError {
    #[error("failed to read label order {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid label order {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("label order is empty")]
    Empty,
}

/// Class codes in model output order, as recorded when the model was trained.
///
/// Output index `i` carries class code `codes[i]`; code 0 is genuine, any
/// other code is manipulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelOrder {
    codes: Vec<i64>,
}

impl Default for LabelOrder {
    fn default() -> Self {
        Self { codes: vec![0, 1] }
    }
}

impl LabelOrder {
    pub fn from_codes(codes: Vec<i64>) -> Result<Self, LabelOrderError> {
        if codes.is_empty() {
            return Err(LabelOrderError::Empty);
        }
        Ok(Self { codes })
    }

    /// Load a JSON array of class codes, e.g. `[0, 1]`.
    pub fn load(path: &str) -> Result<Self, LabelOrderError> {
        let text = std::fs::read_to_string(path).map_err(|source| LabelOrderError::Io {
            path: path.to_string(),
            source,
        })?;
        let codes: Vec<i64> = serde_json::from_str(&text).map_err(|source| LabelOrderError::Parse {
            path: path.to_string(),
            source,
        })?;
        let order = Self::from_codes(codes)?;
        tracing::info!(path, codes = ?order.codes, "loaded classifier label order");
        Ok(order)
    }

    /// Load from `path` if it exists, otherwise fall back to `[0, 1]`.
    pub fn load_or_default(path: &str) -> Result<Self, LabelOrderError> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            tracing::info!(path, "no label order file; using [0, 1]");
            Ok(Self::default())
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn label_for(&self, index: usize) -> Option<ClassLabel> {
        self.codes.get(index).copied().map(ClassLabel::from_class_code)
    }
}

/// A classification model: `[1, 32, 32, 3]` tensor in, class scores out.
pub trait ClassificationModel {
    fn scores(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError>;
}

/// ONNX export of the authenticity CNN.
pub struct OnnxClassifier {
    session: Session,
}

impl OnnxClassifier {
    /// Load the classifier ONNX model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded authenticity classifier"
        );

        Ok(Self { session })
    }
}

impl ClassificationModel for OnnxClassifier {
    fn scores(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("class scores: {e}")))?;

        Ok(scores.to_vec())
    }
}

/// Turns a normalized face into a [`ClassLabel`].
pub struct AuthenticityClassifier<M> {
    model: M,
    labels: LabelOrder,
}

impl<M: ClassificationModel> AuthenticityClassifier<M> {
    pub fn new(model: M, labels: LabelOrder) -> Self {
        Self { model, labels }
    }

    /// Classify a `(32, 32, 3)` face tensor.
    pub fn try_classify(&mut self, face: &Array3<f32>) -> Result<ClassLabel, ClassifierError> {
        let input = face.view().insert_axis(Axis(0)).to_owned();
        let scores = self.model.scores(&input)?;

        let index = argmax(&scores)?;
        self.labels.label_for(index).ok_or(ClassifierError::UnknownClassIndex {
            index,
            len: self.labels.len(),
        })
    }

    /// Like [`try_classify`](Self::try_classify), with failure logged and
    /// collapsed to `None`.
    pub fn classify(&mut self, face: &Array3<f32>) -> Option<ClassLabel> {
        match self.try_classify(face) {
            Ok(label) => Some(label),
            Err(e) => {
                tracing::warn!(error = %e, "classification failed");
                None
            }
        }
    }
}

/// Index of the first maximum score. Non-finite scores are rejected.
fn argmax(scores: &[f32]) -> Result<usize, ClassifierError> {
    if scores.is_empty() {
        return Err(ClassifierError::UnexpectedOutput("no class scores".into()));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(ClassifierError::UnexpectedOutput(format!("non-finite score {bad}")));
    }

    let mut best = 0;
    for (i, &s) in scores.iter().enumerate().skip(1) {
        if s > scores[best] {
            best = i;
        }
    }
    Ok(best)
}
