use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "idcheck", about = "Identity-document verification CLI")]
struct Cli {
    /// Base URL of a running idcheckd instance.
    #[arg(long, default_value = "http://127.0.0.1:8087")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a face photo against an identity document and extract its fields
    Verify {
        /// Identity document (PDF or image)
        #[arg(short, long)]
        document: PathBuf,
        /// Photo of the face to compare
        #[arg(short, long)]
        photo: PathBuf,
    },
    /// Check that the daemon is reachable
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Verify { document, photo } => {
            let form = reqwest::multipart::Form::new()
                .part("id_document", file_part(&document).await?)
                .part("face_photo", file_part(&photo).await?);

            let response = client
                .post(format!("{}/v1/verify", cli.server))
                .multipart(form)
                .send()
                .await
                .context("could not reach idcheckd")?;

            let status = response.status();
            let body: serde_json::Value = response
                .json()
                .await
                .context("daemon returned a non-JSON body")?;
            println!("{}", serde_json::to_string_pretty(&body)?);

            if !status.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let response = client
                .get(format!("{}/healthz", cli.server))
                .send()
                .await
                .context("could not reach idcheckd")?;
            println!("idcheckd: {}", response.status());
        }
    }

    Ok(())
}

/// Read a file into a multipart part, deriving the media type from its
/// extension the way browsers do for uploads.
async fn file_part(path: &Path) -> Result<reqwest::multipart::Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let media_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };

    Ok(reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(media_type)?)
}
