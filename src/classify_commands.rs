//! 分類WebアプリのHTTPハンドラー
//!
//! - `GET /`          アップロードフォーム
//! - `POST /classify` 画像（multipartの `image` フィールド）を分類して結果ページを返す
//! - `GET /health`    稼働確認（JSON）

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::ClassifierError;
use crate::model::ServerSettings;
use crate::pipeline::ClassificationPipeline;
use crate::render;

const IMAGE_FIELD: &str = "image";

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<ClassificationPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<ClassificationPipeline>) -> Self {
        Self { pipeline }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    classes: usize,
}

/// ハンドラーのエラー
#[derive(Debug)]
pub enum WebError {
    /// アップロード内容の不備（フィールド欠落など）
    Upload(String),
    Classifier(ClassifierError),
    Internal(String),
}

impl From<ClassifierError> for WebError {
    fn from(err: ClassifierError) -> Self {
        WebError::Classifier(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebError::Upload(detail) => {
                tracing::warn!(%detail, "rejected upload");
                (
                    StatusCode::BAD_REQUEST,
                    format!("{} Please upload a jpg, jpeg or png image.", detail),
                )
            }
            WebError::Classifier(err) if err.is_request_error() => {
                tracing::warn!(error = %err, "rejected upload");
                (
                    StatusCode::BAD_REQUEST,
                    "The uploaded file could not be read as an image. Please upload a jpg, jpeg or png image again."
                        .to_string(),
                )
            }
            WebError::Classifier(err) => {
                tracing::error!(error = %err, "classification failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Classification failed due to a server error.".to_string(),
                )
            }
            WebError::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Classification failed due to a server error.".to_string(),
                )
            }
        };
        (status, Html(render::error_page(&message))).into_response()
    }
}

/// ルーターを構築
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/classify", post(classify).layer(DefaultBodyLimit::max(max_upload_bytes)))
        .route("/health", get(health))
        .with_state(state)
}

/// サーバーを起動し、Ctrl+C まで待ち受ける
pub async fn serve(pipeline: Arc<ClassificationPipeline>, settings: &ServerSettings) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .context(format!("Failed to bind {}", settings.bind_address))?;
    tracing::info!(address = %listener.local_addr()?, "listening");

    let app = router(AppState::new(pipeline), settings.max_upload_bytes);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

async fn index() -> Html<String> {
    Html(render::index_page())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        classes: state.pipeline.label_map().len(),
    })
}

async fn classify(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Html<String>, WebError> {
    let image = read_image_field(&mut multipart).await?;

    let pipeline = Arc::clone(&state.pipeline);
    let upload = image.clone();
    let classification = tokio::task::spawn_blocking(move || pipeline.classify(&upload))
        .await
        .map_err(|e| WebError::Internal(format!("classification task failed: {}", e)))??;

    tracing::info!(
        label = %classification.prediction.predicted_label,
        confidence = classification.prediction.confidence,
        "classified upload"
    );
    Ok(Html(render::result_page(&classification, &image)))
}

async fn read_image_field(multipart: &mut Multipart) -> Result<Bytes, WebError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| WebError::Upload(format!("Malformed upload: {}.", e.body_text())))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| WebError::Upload(format!("Malformed upload: {}.", e.body_text())))?;
        if bytes.is_empty() {
            return Err(WebError::Upload("The uploaded file is empty.".to_string()));
        }
        return Ok(bytes);
    }
    Err(WebError::Upload("No image was uploaded.".to_string()))
}
