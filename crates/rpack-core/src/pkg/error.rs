//! Package error types.

use super::metadata::PackStatus;
use std::fmt;
use std::io;

/// Package error codes.
pub mod codes {
    pub const PKG_NOT_FOUND: &str = "PKG_NOT_FOUND";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_FILENAME_INVALID: &str = "PKG_FILENAME_INVALID";
    pub const PKG_MANIFEST_NOT_FOUND: &str = "PKG_MANIFEST_NOT_FOUND";
    pub const PKG_ARCHIVE_CORRUPT: &str = "PKG_ARCHIVE_CORRUPT";
    pub const PKG_INSTALL_BLOCKED: &str = "PKG_INSTALL_BLOCKED";
    pub const PKG_INSTALL_FAILED: &str = "PKG_INSTALL_FAILED";
    pub const PKG_PUBLISH_FAILED: &str = "PKG_PUBLISH_FAILED";
    pub const PKG_CONFIG_INVALID: &str = "PKG_CONFIG_INVALID";
    pub const PKG_SELECTOR_INVALID: &str = "PKG_SELECTOR_INVALID";
    pub const PKG_TIMEOUT: &str = "PKG_TIMEOUT";
    pub const PKG_NOT_IMPLEMENTED: &str = "PKG_NOT_IMPLEMENTED";
    pub const PKG_IO_ERROR: &str = "PKG_IO_ERROR";
    pub const PKG_CANCELLED: &str = "PKG_CANCELLED";
}

/// Package error.
#[derive(Debug, Clone)]
pub struct PkgError {
    code: &'static str,
    message: String,
}

impl PkgError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::PKG_NOT_FOUND, format!("Package not found: {name}"))
    }

    /// Create a download failed error (transport or integrity check).
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_DOWNLOAD_FAILED, msg)
    }

    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, msg)
    }

    /// Archive file name is not `<name>_<version>.tar.gz`.
    #[must_use]
    pub fn filename_invalid(filename: &str, reason: &str) -> Self {
        Self::new(
            codes::PKG_FILENAME_INVALID,
            format!("Unrecognized R package file name '{filename}': {reason}"),
        )
    }

    /// Create a manifest not found error.
    #[must_use]
    pub fn manifest_not_found(location: &str) -> Self {
        Self::new(
            codes::PKG_MANIFEST_NOT_FOUND,
            format!("DESCRIPTION file not found in {location}"),
        )
    }

    /// Create a corrupt archive error.
    pub fn archive_corrupt(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_ARCHIVE_CORRUPT, msg)
    }

    /// License verdict forbids installation.
    #[must_use]
    pub fn install_blocked(name: &str, license: &str, class: &str) -> Self {
        Self::new(
            codes::PKG_INSTALL_BLOCKED,
            format!("The license \"{license}\" of {name} is {class} and the installation is not allowed"),
        )
    }

    /// Create an install failed error.
    pub fn install_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_INSTALL_FAILED, msg)
    }

    /// Create a publish failed error.
    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_PUBLISH_FAILED, msg)
    }

    /// Provider constructed against a missing or unreachable backend.
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_CONFIG_INVALID, msg)
    }

    /// Selector of the wrong shape for a backend.
    #[must_use]
    pub fn selector_invalid(provider: &str, expected: &str) -> Self {
        Self::new(
            codes::PKG_SELECTOR_INVALID,
            format!("Provider '{provider}' expects {expected}"),
        )
    }

    /// External process exceeded its time bound.
    #[must_use]
    pub fn timeout(what: &str, secs: u64) -> Self {
        Self::new(
            codes::PKG_TIMEOUT,
            format!("{what} did not finish within {secs} seconds"),
        )
    }

    /// Operation unsupported by a read-only mirror.
    #[must_use]
    pub fn not_implemented(what: &str) -> Self {
        Self::new(codes::PKG_NOT_IMPLEMENTED, format!("{what} is not implemented"))
    }

    /// Create an IO error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_IO_ERROR, msg)
    }

    /// Run aborted through its cancellation token.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(codes::PKG_CANCELLED, "Operation cancelled")
    }

    /// The per-package status this error stands for in batch reports.
    #[must_use]
    pub fn status(&self) -> PackStatus {
        match self.code {
            codes::PKG_NOT_FOUND => PackStatus::NotFound,
            codes::PKG_DOWNLOAD_FAILED | codes::PKG_REGISTRY_ERROR | codes::PKG_CANCELLED => {
                PackStatus::DownloadFailed
            }
            codes::PKG_FILENAME_INVALID
            | codes::PKG_MANIFEST_NOT_FOUND
            | codes::PKG_ARCHIVE_CORRUPT => PackStatus::Invalid,
            _ => PackStatus::DeployFailed,
        }
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PKG_IO_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::PKG_REGISTRY_ERROR, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::PKG_REGISTRY_ERROR, format!("Connection failed: {e}"))
        } else {
            Self::new(codes::PKG_REGISTRY_ERROR, e.to_string())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, format!("Invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        let err = PkgError::not_found("Rcpp");
        assert_eq!(err.code(), codes::PKG_NOT_FOUND);
        assert_eq!(err.to_string(), "PKG_NOT_FOUND: Package not found: Rcpp");
    }

    #[test]
    fn test_error_codes_uppercase() {
        // All codes should be SCREAMING_SNAKE_CASE
        let all_codes = [
            codes::PKG_NOT_FOUND,
            codes::PKG_DOWNLOAD_FAILED,
            codes::PKG_REGISTRY_ERROR,
            codes::PKG_FILENAME_INVALID,
            codes::PKG_MANIFEST_NOT_FOUND,
            codes::PKG_ARCHIVE_CORRUPT,
            codes::PKG_INSTALL_BLOCKED,
            codes::PKG_INSTALL_FAILED,
            codes::PKG_PUBLISH_FAILED,
            codes::PKG_CONFIG_INVALID,
            codes::PKG_SELECTOR_INVALID,
            codes::PKG_TIMEOUT,
            codes::PKG_NOT_IMPLEMENTED,
            codes::PKG_IO_ERROR,
            codes::PKG_CANCELLED,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(PkgError::not_found("x").status(), PackStatus::NotFound);
        assert_eq!(
            PkgError::download_failed("x").status(),
            PackStatus::DownloadFailed
        );
        assert_eq!(
            PkgError::archive_corrupt("x").status(),
            PackStatus::Invalid
        );
        assert_eq!(
            PkgError::install_blocked("x", "AGPL-3", "BLACKLISTED").status(),
            PackStatus::DeployFailed
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let err: PkgError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.code(), codes::PKG_IO_ERROR);
    }
}
