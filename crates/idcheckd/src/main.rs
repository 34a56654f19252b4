use anyhow::Result;
use idcheck_extract::{FieldExtractor, GeminiBackend};
use idcheckd::config::Config;
use idcheckd::engine;
use idcheckd::http::{self, AppState};
use idcheckd::pipeline::{Verifier, VerifierOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("idcheckd starting");

    let config = Config::from_env()?;

    // Load both ONNX models up front; a missing model fails startup.
    let engine = engine::spawn_engine(&config.scrfd_model_path(), &config.arcface_model_path())?;

    let backend = GeminiBackend::new(Duration::from_secs(config.extraction_timeout_secs));
    let extractor = FieldExtractor::new(backend, config.credential_pool(), config.retry_policy());

    let verifier = Arc::new(Verifier::new(
        Arc::new(engine),
        extractor,
        VerifierOptions {
            similarity_threshold: config.similarity_threshold,
            strict_comparison: config.strict_comparison,
            work_dir: config.work_dir.clone(),
        },
    ));

    let app = http::router(AppState { verifier });

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "idcheckd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("idcheckd shutting down");
        })
        .await?;

    Ok(())
}
