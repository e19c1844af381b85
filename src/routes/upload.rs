//! `POST /upload`: accept a JSON export of meter readings and load it.
//!
//! Upload problems (missing file, wrong extension, broken JSON) are answered
//! with `400` before the store is touched. Everything after decoding is
//! delegated to [`crate::pipeline::ingest`].

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use super::AppState;
use crate::pipeline::{ingest, IngestOutcome};

// ---

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    // ---
    Router::new()
        .route("/upload", post(handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

#[derive(Serialize)]
struct UploadSuccess {
    success: bool,
    message: String,
    records_count: usize,
    skipped_count: usize,
}

#[derive(Serialize)]
struct UploadError {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped_count: Option<usize>,
}

fn reject(status: StatusCode, error: impl Into<String>) -> Response {
    // ---
    let body = UploadError {
        success: false,
        error: error.into(),
        skipped_count: None,
    };
    (status, Json(body)).into_response()
}

async fn handler(
    State(store): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    // ---
    let ingest_id = Uuid::new_v4();
    let span = tracing::info_span!("upload", %ingest_id);

    async move {
        info!("POST /upload - Receiving file");

        let payload = match read_upload(multipart).await {
            Ok(payload) => payload,
            Err(rejection) => return rejection,
        };

        match ingest(store.as_ref(), payload).await {
            Ok(IngestOutcome::Written { count, skipped }) => (
                StatusCode::OK,
                Json(UploadSuccess {
                    success: true,
                    message: format!("Successfully imported {count} water consumption records"),
                    records_count: count,
                    skipped_count: skipped,
                }),
            )
                .into_response(),
            Ok(IngestOutcome::NoValidPoints { skipped }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(UploadError {
                    success: false,
                    error: "No valid data points to write".to_string(),
                    skipped_count: Some(skipped),
                }),
            )
                .into_response(),
            Ok(IngestOutcome::NotAcknowledged { skipped }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UploadError {
                    success: false,
                    error: "Failed to write data to InfluxDB".to_string(),
                    skipped_count: Some(skipped),
                }),
            )
                .into_response(),
            Err(e) => {
                error!(error = %e, "Upload failed");
                reject(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Server error: {e}"),
                )
            }
        }
    }
    .instrument(span)
    .await
}

/// Find the `file` part of the form and decode it as JSON.
async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Result<Value, Response> {
    // ---
    let Ok(mut multipart) = multipart else {
        return Err(reject(StatusCode::BAD_REQUEST, "No file provided"));
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(reject(StatusCode::BAD_REQUEST, "No file provided")),
            Err(e) => {
                return Err(reject(e.status(), format!("Invalid upload: {}", e.body_text())))
            }
        };

        // A part without a filename is a plain form value, not a file.
        if field.name() != Some("file") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };

        if filename.is_empty() {
            return Err(reject(StatusCode::BAD_REQUEST, "No file selected"));
        }
        if !filename.ends_with(".json") {
            return Err(reject(StatusCode::BAD_REQUEST, "File must be JSON format"));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| reject(e.status(), format!("Invalid upload: {}", e.body_text())))?;
        info!(%filename, bytes = bytes.len(), "File received");

        return serde_json::from_slice::<Value>(&bytes)
            .map_err(|e| reject(StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}")));
    }
}
