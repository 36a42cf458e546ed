use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Everything that can go wrong while serving a prediction.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("No file uploaded: multipart field `file` is missing")]
    MissingFile,
    #[error("Expected a multipart form: {0}")]
    NotMultipart(#[from] MultipartRejection),
    #[error("Failed to read multipart form: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Failed to decode image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("Decoded image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Model produced {outputs} scores but {labels} class labels are configured")]
    LabelMismatch { labels: usize, outputs: usize },
    #[error("Model produced no scores")]
    EmptyOutput,
    #[error("Prediction worker failed: {0}")]
    Worker(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::MissingFile
            | ServiceError::InvalidImage(_)
            | ServiceError::EmptyImage { .. } => StatusCode::BAD_REQUEST,
            ServiceError::NotMultipart(rejection) => rejection.status(),
            ServiceError::Multipart(err) => err.status(),
            ServiceError::Inference(_)
            | ServiceError::LabelMismatch { .. }
            | ServiceError::EmptyOutput
            | ServiceError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tensorflow::Status> for ServiceError {
    fn from(status: tensorflow::Status) -> Self {
        ServiceError::Inference(status.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "prediction failed");
        } else {
            warn!(error = %self, "rejected prediction request");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        assert_eq!(ServiceError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::EmptyImage { width: 0, height: 4 }.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn model_errors_map_to_server_error() {
        assert_eq!(
            ServiceError::LabelMismatch { labels: 10, outputs: 3 }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::Inference("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
