use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

use crate::config::ModelConfig;
use crate::inference::preprocess::ImageTensor;

/// Raw per-class confidences, expected in `[0, 1]`.
pub type Score = Vec<f32>;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Model artifact not found: {0}")]
    NotFound(String),
    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(String),
    #[error("The {0} backend is not compiled into this build")]
    BackendDisabled(&'static str),
    #[error("Model runtime error: {0}")]
    Runtime(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    #[error("Model runtime error: {0}")]
    Runtime(String),
    #[error("Model returned an empty score")]
    EmptyScore,
    #[error("Model returned a non-finite score")]
    NonFinite,
    #[error("Inference timed out")]
    Timeout,
    #[error("Inference task aborted")]
    Aborted,
}

/// The scoring capability the pipeline depends on.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &ImageTensor) -> Result<Score, PredictionError>;

    fn backend(&self) -> &'static str;
}

/// Loaded model shared by every worker. Immutable after load.
#[derive(Clone)]
pub struct Model {
    classifier: Arc<dyn Classifier>,
    gate: Option<Arc<Mutex<()>>>,
}

impl Model {
    pub fn load(config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let model = Self::from_arc(load_classifier(&config.path)?);
        if config.serialize_inference {
            Ok(model.serialized())
        } else {
            Ok(model)
        }
    }

    pub fn new<C: Classifier + 'static>(classifier: C) -> Self {
        Self::from_arc(Arc::new(classifier))
    }

    fn from_arc(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            gate: None,
        }
    }

    /// Funnels every call through a single process-wide lock.
    pub fn serialized(mut self) -> Self {
        self.gate = Some(Arc::new(Mutex::new(())));
        self
    }

    pub fn is_serialized(&self) -> bool {
        self.gate.is_some()
    }

    pub fn backend(&self) -> &'static str {
        self.classifier.backend()
    }

    pub fn predict(&self, input: &ImageTensor) -> Result<Score, PredictionError> {
        // The guarded value is `()`, so a poisoned lock carries no broken state.
        let _guard = self
            .gate
            .as_ref()
            .map(|gate| gate.lock().unwrap_or_else(PoisonError::into_inner));
        self.classifier.predict(input)
    }
}

fn load_classifier(path: &Path) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    if !path.is_file() {
        return Err(ModelLoadError::NotFound(path.display().to_string()));
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("onnx") => load_onnx(path),
        Some("pt") | Some("pth") => load_torch(path),
        _ => Err(ModelLoadError::UnsupportedFormat(path.display().to_string())),
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    Ok(Arc::new(super::onnx::OnnxClassifier::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(_path: &Path) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    Err(ModelLoadError::BackendDisabled("onnx"))
}

#[cfg(feature = "torch")]
fn load_torch(path: &Path) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    Ok(Arc::new(super::torch::TorchClassifier::load(path)?))
}

#[cfg(not(feature = "torch"))]
fn load_torch(_path: &Path) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    Err(ModelLoadError::BackendDisabled("torch"))
}

pub enum ModelState {
    Loading,
    Ready(Model),
    Failed(String),
}

impl ModelState {
    pub fn name(&self) -> &'static str {
        match self {
            ModelState::Loading => "loading",
            ModelState::Ready(_) => "ready",
            ModelState::Failed(_) => "failed",
        }
    }
}

/// Readiness of the process-wide model. Requests only see a model once it is `Ready`.
#[derive(Clone)]
pub struct ModelSlot {
    state: Arc<RwLock<ModelState>>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ModelState::Loading)),
        }
    }

    #[cfg(test)]
    pub fn ready(model: Model) -> Self {
        Self {
            state: Arc::new(RwLock::new(ModelState::Ready(model))),
        }
    }

    pub async fn set_ready(&self, model: Model) {
        *self.state.write().await = ModelState::Ready(model);
    }

    #[cfg(test)]
    pub async fn set_failed(&self, reason: impl Into<String>) {
        *self.state.write().await = ModelState::Failed(reason.into());
    }

    pub async fn current(&self) -> Option<Model> {
        match &*self.state.read().await {
            ModelState::Ready(model) => Some(model.clone()),
            _ => None,
        }
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, ModelState> {
        self.state.read().await
    }
}

impl Default for ModelSlot {
    fn default() -> Self {
        Self::new()
    }
}
