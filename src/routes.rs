use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ServiceError;
use crate::model::{Classifier, Prediction};
use crate::preprocess::{preprocess_image, ResizeFilter};

pub struct AppState {
    pub classifier: Arc<dyn Classifier>,
    pub resize_filter: ResizeFilter,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health_check))
        .route("/predict", post(predict_handler))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn home() -> &'static str {
    "Hello World"
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK" }))
}

async fn predict_handler(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, ServiceError> {
    let mut multipart = multipart?;
    let image_data = read_file_field(&mut multipart).await?;
    let size = image_data.len();

    let prediction = tokio::task::spawn_blocking(move || {
        let input = preprocess_image(&image_data, state.resize_filter)?;
        state.classifier.predict(&input)
    })
    .await
    .map_err(|err| ServiceError::Worker(err.to_string()))??;

    info!(
        bytes = size,
        character = %prediction.character,
        confidence = prediction.confidence,
        "prediction"
    );
    Ok(Json(prediction))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Vec<u8>, ServiceError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            return Ok(field.bytes().await?.to_vec());
        }
    }

    Err(ServiceError::MissingFile)
}
