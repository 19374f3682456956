//! `<name>_<version>.tar.gz` archive naming.

use super::error::PkgError;

/// Source archive extension.
pub const ARCHIVE_EXT: &str = ".tar.gz";

/// Build the archive file name for a package.
#[must_use]
pub fn format_filename(name: &str, version: &str) -> String {
    format!("{name}_{version}{ARCHIVE_EXT}")
}

/// Split an archive path or file name into `(name, version)`.
///
/// Only the last path segment is considered. It must hold exactly one `_`
/// and end with `.tar.gz`.
pub fn parse_filename(path: &str) -> Result<(String, String), PkgError> {
    let filename = basename(path);
    let mut parts = filename.split('_');
    let (Some(name), Some(rest), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(PkgError::filename_invalid(
            filename,
            "expected exactly one '_' separator",
        ));
    };
    let Some(version) = rest.strip_suffix(ARCHIVE_EXT) else {
        return Err(PkgError::filename_invalid(filename, "wrong package extension"));
    };
    if name.is_empty() || version.is_empty() {
        return Err(PkgError::filename_invalid(filename, "empty name or version"));
    }
    Ok((name.to_string(), version.to_string()))
}

/// Whether `s` looks like an archive reference rather than a bare name.
#[must_use]
pub fn is_archive_name(s: &str) -> bool {
    s.ends_with(ARCHIVE_EXT)
}

/// Last `/`-separated segment of a repository path.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
