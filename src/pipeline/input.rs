//! Input resolution: normalise a user-supplied path or URL to container
//! bytes.
//!
//! ## Why validate magic bytes here?
//!
//! A zip archive starts with `PK\x03\x04`. Checking those four bytes before
//! handing the buffer to the container parser turns "central directory not
//! found at offset …" into a meaningful error naming the offending file.
//! URL inputs are downloaded into a `TempDir` so cleanup happens
//! automatically when the handle drops, even if the process panics.

use crate::error::IngestError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Zip local-file-header signature.
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// The resolved input — either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the container was downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until reading completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the container file regardless of how it was resolved.
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

/// Resolve the input string to a local container file path.
///
/// If the input is a URL, download it to a temporary directory.
/// If the input is a local file, validate it exists and is readable.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, IngestError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Resolve an input to its raw bytes, ready for [`crate::container`].
pub async fn read_container(input: &str, timeout_secs: u64) -> Result<Vec<u8>, IngestError> {
    let resolved = resolve_input(input, timeout_secs).await?;
    let bytes = tokio::fs::read(resolved.path())
        .await
        .map_err(|e| IngestError::Internal(format!("failed to read container: {e}")))?;
    Ok(bytes)
}

/// Resolve a local file path, validating existence and zip magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, IngestError> {
    let path = PathBuf::from(path_str);

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && magic != ZIP_MAGIC {
                return Err(IngestError::NotAContainer { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(IngestError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(IngestError::FileNotFound { path });
        }
    }

    debug!("Resolved local container: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, IngestError> {
    info!("Downloading container from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IngestError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            IngestError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            IngestError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(IngestError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);

    let temp_dir = TempDir::new().map_err(|e| IngestError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| IngestError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if bytes.len() >= 4 && bytes[..4] != ZIP_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(IngestError::NotAContainer {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| IngestError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Extract a reasonable filename from the URL path.
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

    "downloaded.epub".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/book.epub"));
        assert!(is_url("http://example.com/book.epub"));
        assert!(!is_url("/tmp/book.epub"));
        assert!(!is_url("book.epub"));
        assert!(!is_url(""));
    }

    #[test]
    fn local_non_zip_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7 not a zip at all").unwrap();
        let err = resolve_local(f.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, IngestError::NotAContainer { .. }), "got: {err:?}");
    }

    #[test]
    fn local_missing_file() {
        let err = resolve_local("/definitely/not/here.epub").unwrap_err();
        assert!(matches!(err, IngestError::FileNotFound { .. }));
    }

    #[test]
    fn local_zip_is_accepted() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0x50, 0x4B, 0x03, 0x04, 0x00, 0x00]).unwrap();
        let resolved = resolve_local(f.path().to_str().unwrap()).unwrap();
        assert_eq!(resolved.path(), f.path());
    }

    #[test]
    fn filename_extraction() {
        assert_eq!(
            extract_filename("https://example.com/books/moby.epub"),
            "moby.epub"
        );
        assert_eq!(extract_filename("https://example.com/"), "downloaded.epub");
    }
}
