//! Archive download with integrity checks.
//!
//! Repository managers and mirrors happily answer a missing file with a
//! 200 and an HTML or plain-text error page. Bodies are therefore checked
//! after transfer: empty bodies, text content types and anything that is
//! not gzip data are rejected.

use super::error::PkgError;
use super::http::{with_auth, Credentials};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum archive size (512 MB).
pub const MAX_ARCHIVE_SIZE: u64 = 512 * 1024 * 1024;

/// Download timeout in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 120;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Download an archive from a URL.
///
/// # Errors
/// `PKG_NOT_FOUND` on 404; `PKG_DOWNLOAD_FAILED` on transport errors,
/// oversized bodies, or bodies that are not a gzip archive.
pub async fn download_archive(
    client: &Client,
    url: &str,
    max_bytes: u64,
    auth: Option<&Credentials>,
) -> Result<Bytes, PkgError> {
    let request = client
        .get(url)
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS));

    let response = with_auth(request, auth)
        .send()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to download '{url}': {e}")))?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(PkgError::not_found(url));
    }

    if !response.status().is_success() {
        return Err(PkgError::download_failed(format!(
            "Download failed with status {} for '{url}'",
            response.status()
        )));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(PkgError::download_failed(format!(
                "Archive too large: {len} bytes (max: {max_bytes})"
            )));
        }
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to read response body: {e}")))?;

    if bytes.len() as u64 > max_bytes {
        return Err(PkgError::download_failed(format!(
            "Archive too large: {} bytes (max: {max_bytes})",
            bytes.len()
        )));
    }

    check_archive(&bytes, content_type.as_deref())
        .map_err(|e| PkgError::download_failed(format!("{} ('{url}')", e.message())))?;

    Ok(bytes)
}

/// Reject bodies that cannot be a `.tar.gz`.
///
/// # Errors
/// Returns `PKG_DOWNLOAD_FAILED` describing the first failed check.
pub fn check_archive(bytes: &[u8], content_type: Option<&str>) -> Result<(), PkgError> {
    if bytes.is_empty() {
        return Err(PkgError::download_failed("The downloaded package has a zero size"));
    }

    if let Some(ct) = content_type {
        if ct.starts_with("text/html") || ct.starts_with("text/plain") {
            return Err(PkgError::download_failed(format!(
                "The server answered with a text page ({ct}) instead of an archive"
            )));
        }
    }

    if !bytes.starts_with(&GZIP_MAGIC) {
        let looks_textual = bytes
            .iter()
            .take(512)
            .all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace());
        let what = if looks_textual { "ASCII text" } else { "unknown binary data" };
        return Err(PkgError::download_failed(format!(
            "The downloaded package is {what}, not a gzip archive"
        )));
    }

    Ok(())
}

/// Download `url` into `dest_dir/filename`. Returns the written path.
///
/// # Errors
/// Same as [`download_archive`], plus IO errors writing the file.
pub async fn download_to(
    client: &Client,
    url: &str,
    dest_dir: &Path,
    filename: &str,
    auth: Option<&Credentials>,
) -> Result<PathBuf, PkgError> {
    let bytes = download_archive(client, url, MAX_ARCHIVE_SIZE, auth).await?;
    std::fs::create_dir_all(dest_dir)?;
    let target = dest_dir.join(filename);
    rpack_util::fs::atomic_write(&target, &bytes)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::codes;

    #[test]
    fn test_check_archive_accepts_gzip() {
        let mut data = GZIP_MAGIC.to_vec();
        data.extend_from_slice(&[0, 1, 2, 3]);
        assert!(check_archive(&data, Some("application/x-gzip")).is_ok());
        assert!(check_archive(&data, None).is_ok());
    }

    #[test]
    fn test_check_archive_zero_size() {
        let err = check_archive(&[], None).unwrap_err();
        assert_eq!(err.code(), codes::PKG_DOWNLOAD_FAILED);
        assert!(err.message().contains("zero size"));
    }

    #[test]
    fn test_check_archive_html_content_type() {
        let mut data = GZIP_MAGIC.to_vec();
        data.push(0);
        let err = check_archive(&data, Some("text/html; charset=utf-8")).unwrap_err();
        assert!(err.message().contains("text page"));
    }

    #[test]
    fn test_check_archive_text_body() {
        let err = check_archive(b"<html><body>404</body></html>", Some("application/octet-stream"))
            .unwrap_err();
        assert!(err.message().contains("ASCII text"));
    }

    #[test]
    fn test_check_archive_binary_garbage() {
        let err = check_archive(&[0x00, 0xff, 0x10], None).unwrap_err();
        assert!(err.message().contains("not a gzip archive"));
    }
}
