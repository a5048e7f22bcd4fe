use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ApiResponse;

use crate::inference::pipeline::PipelineError;
use crate::upload::UploadError;

pub const PREDICTION_FAILED: &str = "Terjadi kesalahan dalam melakukan prediksi";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Model is not ready")]
    ModelUnavailable,
}

impl ApiError {
    pub fn log_message(&self, path: &str) -> String {
        match self {
            ApiError::Upload(e) => format!("Rejected upload for path {}: {}", path, e),
            ApiError::Pipeline(e) => format!("Prediction failed for path {}: {}", path, e),
            ApiError::ModelUnavailable => format!("Request for path {} arrived before the model was ready", path),
        }
    }

    /// What the client sees. Processing failures share one message so causes never leak.
    fn client_message(&self) -> String {
        match self {
            ApiError::Upload(UploadError::InvalidFileType { .. }) => "Only image files are allowed".to_string(),
            ApiError::Upload(UploadError::UnexpectedFile { .. }) => "Unexpected field".to_string(),
            ApiError::Upload(UploadError::Malformed(_)) => "Malformed multipart request".to_string(),
            ApiError::Upload(UploadError::Spool(_)) => "Internal server error".to_string(),
            ApiError::Upload(e) => e.to_string(),
            // Kept at 400 rather than 500 for wire compatibility with existing clients.
            ApiError::Pipeline(_) => PREDICTION_FAILED.to_string(),
            ApiError::ModelUnavailable => self.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Upload(UploadError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upload(UploadError::Spool(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upload(_) | ApiError::Pipeline(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiResponse::fail(self.client_message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::model::PredictionError;

    fn check(err: ApiError, status: StatusCode, message: &str) {
        assert_eq!(err.status_code(), status);
        assert_eq!(err.client_message(), message);
    }

    #[test]
    fn upload_errors_keep_their_messages() {
        check(UploadError::NoFile.into(), StatusCode::BAD_REQUEST, "No file uploaded");
        check(
            UploadError::PayloadTooLarge { limit: 1_000_000 }.into(),
            StatusCode::PAYLOAD_TOO_LARGE,
            "Payload content length greater than maximum allowed: 1000000",
        );
        check(
            UploadError::InvalidFileType {
                mime: Some("text/plain".into()),
            }
            .into(),
            StatusCode::BAD_REQUEST,
            "Only image files are allowed",
        );
        check(
            UploadError::UnexpectedFile {
                field: Some("attachment".into()),
            }
            .into(),
            StatusCode::BAD_REQUEST,
            "Unexpected field",
        );
    }

    #[test]
    fn processing_errors_share_one_message() {
        let err: ApiError = PipelineError::from(PredictionError::Runtime("CUDA out of memory".into())).into();
        check(err, StatusCode::BAD_REQUEST, PREDICTION_FAILED);

        let err: ApiError = PipelineError::from(PredictionError::Timeout).into();
        check(err, StatusCode::BAD_REQUEST, PREDICTION_FAILED);
    }

    #[test]
    fn spool_failure_hides_io_detail() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/var/uploads");
        check(
            UploadError::Spool(io).into(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
        );
    }

    #[test]
    fn log_message_carries_the_cause() {
        let err: ApiError = PipelineError::from(PredictionError::Runtime("shape mismatch".into())).into();
        assert!(err.log_message("/predict").contains("shape mismatch"));
    }
}
