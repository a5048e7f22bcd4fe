use actix_web::web::{self, Bytes};
use shared::{Label, PredictionResult};
use std::time::Duration;

use crate::inference::model::{Model, PredictionError};
use crate::inference::preprocess::{DecodeError, ImageTensor, preprocess};

/// Confidence (in percent) above which an image is labelled `Cancer`.
pub const CONFIDENCE_THRESHOLD: f64 = 50.0;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

pub fn confidence(score: &[f32]) -> Result<f64, PredictionError> {
    if score.is_empty() {
        return Err(PredictionError::EmptyScore);
    }
    if score.iter().any(|v| !v.is_finite()) {
        return Err(PredictionError::NonFinite);
    }
    let max = score.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    Ok(f64::from(max) * 100.0)
}

/// Exactly 50 stays on the non-cancer side.
pub fn classify(confidence: f64) -> Label {
    if confidence <= CONFIDENCE_THRESHOLD {
        Label::NonCancer
    } else {
        Label::Cancer
    }
}

pub fn run(model: &Model, tensor: &ImageTensor) -> Result<PredictionResult, PredictionError> {
    let score = model.predict(tensor)?;
    let confidence = confidence(&score)?;
    let label = classify(confidence);
    log::debug!("Confidence {:.4}% -> {}", confidence, label);
    Ok(PredictionResult::new(label))
}

pub fn predict_image(model: &Model, image: &[u8]) -> Result<PredictionResult, PipelineError> {
    let tensor = preprocess(image)?;
    Ok(run(model, &tensor)?)
}

/// Runs decode and inference on the blocking pool, bounded by `timeout`.
///
/// On timeout the blocking task keeps running to completion and its result is dropped.
pub async fn predict_blocking(
    model: Model,
    image: Bytes,
    timeout: Duration,
) -> Result<PredictionResult, PipelineError> {
    let task = web::block(move || predict_image(&model, &image));
    match actix_web::rt::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            log::error!("Inference task failed: {}", e);
            Err(PredictionError::Aborted.into())
        }
        Err(_) => Err(PredictionError::Timeout.into()),
    }
}
