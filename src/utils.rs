use std::path::Path;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use thiserror::Error;
use tracing::info;

use crate::config::Settings;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("{path} does not exist and {var} is not set")]
    NoSource { path: String, var: &'static str },
    #[error("GITHUB_TOKEN is not a valid header value")]
    InvalidToken,
    #[error("Failed to download {url}: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("Failed to download {url}: HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

async fn download_file(url: &str, path: &Path, token: Option<&str>) -> Result<(), DownloadError> {
    info!(url, path = %path.display(), "downloading");

    let mut header_map = HeaderMap::new();

    if let Some(token) = token {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| DownloadError::InvalidToken)?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let request_error = |source| DownloadError::Request {
        url: url.to_string(),
        source,
    };

    let response = reqwest::Client::new()
        .get(url)
        .headers(header_map)
        .send()
        .await
        .map_err(request_error)?;

    if !response.status().is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let bytes = response.bytes().await.map_err(request_error)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| write_error(path, source))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| write_error(path, source))
}

fn write_error(path: &Path, source: std::io::Error) -> DownloadError {
    DownloadError::Write {
        path: path.display().to_string(),
        source,
    }
}

async fn ensure_file(
    path: &Path,
    url: Option<&str>,
    var: &'static str,
    token: Option<&str>,
) -> Result<(), DownloadError> {
    if path.exists() {
        return Ok(());
    }

    match url {
        Some(url) => download_file(url, path, token).await,
        None => Err(DownloadError::NoSource {
            path: path.display().to_string(),
            var,
        }),
    }
}

/// Fetches the model and class list when they are missing on disk.
pub async fn ensure_files_exist(settings: &Settings) -> Result<(), DownloadError> {
    info!("Checking model...");
    let token = settings.github_token.as_deref();
    ensure_file(
        &settings.model.path,
        settings.model_url.as_deref(),
        "MODEL_URL",
        token,
    )
    .await?;

    if let Some(class_list_path) = &settings.class_list_path {
        ensure_file(
            class_list_path,
            settings.class_list_url.as_deref(),
            "CLASS_LIST_URL",
            token,
        )
        .await?;
    }

    Ok(())
}
