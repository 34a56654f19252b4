//! HTTP surface: multipart intake and response encoding.

use crate::pipeline::{UploadedAsset, Verifier};
use crate::response::{ResponseCode, VerificationResponse};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use idcheck_extract::GeminiBackend;
use std::sync::Arc;

/// Uploads larger than this are rejected by axum before the pipeline runs.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<Verifier<GeminiBackend>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/verify", post(verify_handler))
        .route("/healthz", get(|| async { "OK" }))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn verify_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<VerificationResponse>) {
    let mut document: Option<UploadedAsset> = None;
    let mut photo: Option<UploadedAsset> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or_default().to_string();
                let media_type = field.content_type().unwrap_or_default().to_string();
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes.to_vec(),
                    Err(error) => {
                        tracing::debug!(error = %error, part = %name, "failed to read multipart field");
                        return invalid_input("could not read uploaded file");
                    }
                };
                match name.as_str() {
                    "id_document" => document = Some(UploadedAsset { bytes, media_type }),
                    "face_photo" => photo = Some(UploadedAsset { bytes, media_type }),
                    other => tracing::debug!(part = other, "ignoring unknown multipart field"),
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(error = %error, "unreadable multipart body");
                return invalid_input("unreadable multipart body");
            }
        }
    }

    let (Some(document), Some(photo)) = (document, photo) else {
        return invalid_input("both id_document and face_photo files are required");
    };

    let response = state.verifier.verify(document, photo).await;
    (response.code.http_status(), Json(response))
}

fn invalid_input(message: &str) -> (StatusCode, Json<VerificationResponse>) {
    let response =
        VerificationResponse::failed(ResponseCode::InvalidInput, message.to_string(), None);
    (response.code.http_status(), Json(response))
}
