use actix_multipart::Multipart;
use actix_web::{HttpRequest, HttpResponse, web};
use serde_json::json;
use shared::{ApiResponse, PredictionResult};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::inference::model::{ModelSlot, ModelState};
use crate::inference::pipeline;
use crate::upload::UploadGate;

pub struct AppState {
    pub model: ModelSlot,
    pub gate: UploadGate,
    pub inference_timeout: Duration,
}

impl AppState {
    pub fn new(model: ModelSlot, config: &ServerConfig) -> Self {
        Self {
            model,
            gate: UploadGate::new(&config.upload),
            inference_timeout: config.model.inference_timeout(),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(handle_predict)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn handle_predict(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    match predict(&state, &req, payload).await {
        Ok(result) => {
            log::info!("Prediction {} -> {}", result.id, result.result);
            Ok(HttpResponse::Ok().json(ApiResponse::success(
                "Model is predicted successfully",
                result,
            )))
        }
        Err(e) => {
            match &e {
                ApiError::Upload(_) => log::warn!("{}", e.log_message(req.path())),
                _ => log::error!("{}", e.log_message(req.path())),
            }
            Err(e)
        }
    }
}

async fn predict(
    state: &AppState,
    req: &HttpRequest,
    payload: Multipart,
) -> Result<PredictionResult, ApiError> {
    let model = state.model.current().await.ok_or(ApiError::ModelUnavailable)?;
    let upload = state.gate.accept(req, payload).await?;
    log::debug!(
        "Accepted {} upload of {} bytes (extension: {:?}, spooled to: {:?})",
        upload.mime_type,
        upload.bytes.len(),
        upload.extension,
        upload.spool_path()
    );

    let result =
        pipeline::predict_blocking(model, upload.bytes.clone(), state.inference_timeout).await?;
    Ok(result)
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let model_state = state.model.read().await;
    match &*model_state {
        ModelState::Ready(model) => HttpResponse::Ok().json(ApiResponse::success(
            model_state.name(),
            json!({ "backend": model.backend(), "serialized": model.is_serialized() }),
        )),
        ModelState::Failed(reason) => {
            log::warn!("Health check while model is failed: {}", reason);
            HttpResponse::ServiceUnavailable().json(ApiResponse::fail(model_state.name()))
        }
        ModelState::Loading => {
            HttpResponse::ServiceUnavailable().json(ApiResponse::fail(model_state.name()))
        }
    }
}
