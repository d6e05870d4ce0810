//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! pdfium needs a file-system path, so URL inputs are downloaded into a
//! `TempDir` that lives as long as the [`ResolvedInput`]. Local files are
//! checked for existence, readability, and a plausible format before any
//! stage runs, so a bad input fails fast with `DocumentAccess`.

use crate::error::PipelineError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the file lives in a temp directory kept alive here.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the document regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Whether the path names a pre-extracted JSON document.
pub fn is_json_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Resolve the input string to a local document path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, PipelineError> {
    if input.trim().is_empty() {
        return Err(PipelineError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

fn access_error(path: &Path, reason: impl Into<String>) -> PipelineError {
    PipelineError::DocumentAccess {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Resolve a local file path, validating existence and format.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, PipelineError> {
    let path = PathBuf::from(path_str);

    if !path.is_file() {
        return Err(access_error(&path, "file not found"));
    }

    let mut file = std::fs::File::open(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => access_error(&path, "permission denied"),
        _ => access_error(&path, e.to_string()),
    })?;

    if !is_json_document(&path) {
        let mut magic = [0u8; 4];
        if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
            return Err(access_error(
                &path,
                format!("not a PDF (first bytes {magic:?})"),
            ));
        }
    }

    debug!("Resolved local document: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, PipelineError> {
    info!("Downloading document from: {}", url);

    let download_err = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| download_err(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            download_err(format!("timed out after {timeout_secs}s"))
        } else {
            download_err(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(download_err(format!("HTTP {}", response.status())));
    }

    let filename = extract_filename(url);
    let temp_dir = TempDir::new().map_err(|e| PipelineError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_err(e.to_string()))?;

    if !is_json_document(&file_path) && !bytes.starts_with(b"%PDF") {
        return Err(access_error(&file_path, "downloaded file is not a PDF"));
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| PipelineError::Internal(format!("Failed to write temp file: {e}")))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Extract a reasonable filename from the URL path.
///
/// The filename matters: its stem becomes the document id and thus the
/// metro context.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
