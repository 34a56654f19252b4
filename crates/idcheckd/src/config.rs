use anyhow::Context;
use idcheck_extract::{ApiKey, CredentialPool, RetryPolicy};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP surface binds to.
    pub listen_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root directory for per-request transient artifacts.
    pub work_dir: PathBuf,
    /// Similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Fail the request on face-comparison errors instead of degrading.
    pub strict_comparison: bool,
    /// Total extraction attempts before degrading to empty fields.
    pub extraction_attempts: u32,
    /// Per-call timeout for the remote extraction service.
    pub extraction_timeout_secs: u64,
    /// Primary extraction-service credential.
    pub primary_api_key: String,
    /// Fallback credentials for quota rotation.
    pub fallback_api_keys: Vec<String>,
}

impl Config {
    /// Load configuration from `IDCHECK_*` environment variables with
    /// defaults; the primary extraction credential is required.
    pub fn from_env() -> anyhow::Result<Self> {
        let primary_api_key =
            std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;

        let fallback_api_keys = std::env::var("GEMINI_API_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            listen_addr: std::env::var("IDCHECK_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8087".to_string()),
            model_dir: std::env::var("IDCHECK_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            work_dir: std::env::var("IDCHECK_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            similarity_threshold: env_f32(
                "IDCHECK_SIMILARITY_THRESHOLD",
                idcheck_core::DEFAULT_SIMILARITY_THRESHOLD,
            ),
            strict_comparison: std::env::var("IDCHECK_STRICT_COMPARISON")
                .map(|v| v == "1")
                .unwrap_or(false),
            extraction_attempts: env_u32("IDCHECK_EXTRACTION_ATTEMPTS", 30),
            extraction_timeout_secs: env_u64("IDCHECK_EXTRACTION_TIMEOUT_SECS", 30),
            primary_api_key,
            fallback_api_keys,
        })
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn credential_pool(&self) -> CredentialPool {
        CredentialPool::new(
            ApiKey::new(self.primary_api_key.clone()),
            self.fallback_api_keys
                .iter()
                .cloned()
                .map(ApiKey::new)
                .collect(),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.extraction_attempts.max(1),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
