use anyhow::{Context, Result};
use deepcheck_core::DEFAULT_FACE_CONFIDENCE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file, then
/// `DEEPCHECK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the ONNX model files and the label order.
    pub model_dir: PathBuf,
    /// SSD face detector file name inside `model_dir`.
    pub detector_model: String,
    /// Authenticity classifier file name inside `model_dir`.
    pub classifier_model: String,
    /// JSON array of class codes in classifier output order.
    pub labels_file: String,
    /// Minimum detector confidence for a face.
    pub face_confidence: f32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            detector_model: "face_detector.onnx".to_string(),
            classifier_model: "authenticity.onnx".to_string(),
            labels_file: "labels.json".to_string(),
            face_confidence: DEFAULT_FACE_CONFIDENCE,
            intra_threads: 2,
        }
    }
}

impl Config {
    /// Load configuration, reading `path` as TOML if given, then applying
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("DEEPCHECK_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("DEEPCHECK_DETECTOR_MODEL") {
            self.detector_model = name;
        }
        if let Some(name) = lookup("DEEPCHECK_CLASSIFIER_MODEL") {
            self.classifier_model = name;
        }
        if let Some(name) = lookup("DEEPCHECK_LABELS") {
            self.labels_file = name;
        }
        if let Some(v) = parsed::<f32>(&lookup, "DEEPCHECK_FACE_CONFIDENCE") {
            self.face_confidence = v;
        }
        if let Some(v) = parsed::<usize>(&lookup, "DEEPCHECK_INTRA_THREADS") {
            self.intra_threads = v;
        }
    }

    /// Path to the SSD face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_path(&self.detector_model)
    }

    /// Path to the authenticity classification model.
    pub fn classifier_model_path(&self) -> String {
        self.model_path(&self.classifier_model)
    }

    /// Path to the classifier label order.
    pub fn labels_path(&self) -> String {
        self.model_path(&self.labels_file)
    }

    fn model_path(&self, name: &str) -> String {
        self.model_dir.join(name).to_string_lossy().into_owned()
    }
}

/// `$XDG_DATA_HOME/deepcheck/models`, falling back to `~/.local/share`.
fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("deepcheck/models")
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
