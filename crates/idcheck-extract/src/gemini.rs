//! Remote extraction backend: Gemini `generateContent` over HTTP.

use crate::credentials::ApiKey;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;
use thiserror::Error;

/// Model used for structured document extraction.
pub const GEMINI_MODEL: &str = "gemini-1.5-flash";

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Error, Debug)]
pub enum ExtractError {
    /// Rate/usage limit hit; the only failure class that rotates and retries.
    #[error("extraction quota exhausted")]
    QuotaExhausted,
    #[error("extraction service error (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("extraction transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("extraction service returned no text")]
    EmptyReply,
}

/// Seam over the remote structured-extraction capability.
///
/// The credential is threaded through every call explicitly; implementations
/// must not hold mutable key state.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn generate(
        &self,
        key: &ApiKey,
        prompt: &str,
        image_png: &[u8],
    ) -> Result<String, ExtractError>;
}

/// Production backend talking to the Gemini API.
pub struct GeminiBackend {
    client: reqwest::Client,
}

impl GeminiBackend {
    /// Build a backend with a conservative per-call timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self { client }
    }
}

#[async_trait]
impl ExtractionBackend for GeminiBackend {
    async fn generate(
        &self,
        key: &ApiKey,
        prompt: &str,
        image_png: &[u8],
    ) -> Result<String, ExtractError> {
        let url = format!(
            "{GEMINI_ENDPOINT}/{GEMINI_MODEL}:generateContent?key={}",
            key.expose()
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [
                { "text": prompt },
                { "inlineData": { "mimeType": "image/png", "data": STANDARD.encode(image_png) } }
            ]}]
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();

        if status.as_u16() == 429 {
            return Err(ExtractError::QuotaExhausted);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("RESOURCE_EXHAUSTED") {
                return Err(ExtractError::QuotaExhausted);
            }
            return Err(ExtractError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = resp.json().await?;
        json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or(ExtractError::EmptyReply)
    }
}
