//! The provider capability set shared by every backend.

use super::error::{codes, PkgError};
use super::filename::{basename, format_filename, is_archive_name, parse_filename, ARCHIVE_EXT};
use super::metadata::{ManifestSource, PackStatus, PackageMetadata};
use super::version::most_recent_index;
use futures::stream::{self, StreamExt};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::TempDir;
use tracing::{info, warn};

/// Bioconductor package views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum BiocView {
    #[default]
    Software,
    ExperimentData,
    AnnotationData,
}

impl BiocView {
    pub const ALL: [Self; 3] = [Self::Software, Self::ExperimentData, Self::AnnotationData];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::ExperimentData => "experimentData",
            Self::AnnotationData => "annotationData",
        }
    }

    /// URL path segment of the view.
    #[must_use]
    pub fn segment(self) -> &'static str {
        match self {
            Self::Software => "bioc",
            Self::ExperimentData => "data/experiment",
            Self::AnnotationData => "data/annotation",
        }
    }
}

impl fmt::Display for BiocView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BiocView {
    type Err = PkgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                PkgError::selector_invalid(
                    "bioc",
                    "a view among software, experimentData, annotationData",
                )
            })
    }
}

/// Backend-specific addressing for list and fetch calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selector {
    /// Backend default: every repo folder, the latest snapshot or release.
    #[default]
    Any,
    /// One repo folder of a repository manager or local repository.
    Repo(String),
    /// A CRAN/MRAN snapshot date (`YYYY-MM-DD`).
    Snapshot(String),
    /// A Bioconductor release and view.
    Bioc { release: String, view: BiocView },
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Repo(repo) => write!(f, "repo {repo}"),
            Self::Snapshot(date) => write!(f, "snapshot {date}"),
            Self::Bioc { release, view } => write!(f, "release {release} ({view})"),
        }
    }
}

/// Uniform operations over package repositories.
///
/// Per-package failures are reported as [`PackStatus`] values and never abort
/// batch operations; `Err` is reserved for malformed requests (wrong selector
/// shape) and backend-wide failures.
#[allow(async_fn_in_trait)]
pub trait Provider {
    /// Instance name used in logs and reports.
    fn name(&self) -> &str;

    /// Enumerate available packages (archive names, paths or package names).
    async fn list(&self, selector: &Selector) -> Result<Vec<String>, PkgError>;

    /// Entries of `list` matching a shell-style pattern.
    ///
    /// Patterns without `/` are matched against the last path segment.
    async fn find(&self, pattern: &str, selector: &Selector) -> Result<Vec<String>, PkgError> {
        let pattern = compile_pattern(pattern)?;
        Ok(self
            .list(selector)
            .await?
            .into_iter()
            .filter(|entry| matches_entry(&pattern, entry))
            .collect())
    }

    /// Resolve `name` to one candidate, fetch and parse it.
    ///
    /// A missing package yields status `NOT_FOUND`, transport failures
    /// `DOWNLOAD_FAILED`, unparsable archives `INVALID`. With
    /// `keep_temp_files` the fetched archive stays on disk (in a temp dir
    /// owned by the returned value) so the caller can act on it.
    async fn fetch_metadata(
        &self,
        name: &str,
        selector: &Selector,
        keep_temp_files: bool,
    ) -> Result<PackageMetadata, PkgError>;

    /// Download the most recent archive of `name` into `dest`.
    async fn download_one(
        &self,
        name: &str,
        selector: &Selector,
        dest: &Path,
    ) -> Result<PackStatus, PkgError>;

    /// Download many packages with bounded concurrency.
    ///
    /// Returns one status per input name, in input order.
    async fn download_many(
        &self,
        names: &[String],
        selector: &Selector,
        dest: &Path,
        concurrency: usize,
    ) -> Vec<PackStatus> {
        stream::iter(names)
            .map(|name| async move {
                match self.download_one(name, selector, dest).await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(provider = self.name(), package = %name, error = %e, "download failed");
                        PackStatus::DownloadFailed
                    }
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Publish (upload, copy or install) one archive.
    ///
    /// An existing package is left alone (reported `DEPLOYED`) unless
    /// `overwrite` is set or its name is in `overwrite_names`.
    async fn publish_one(
        &self,
        path: &Path,
        dest: &Selector,
        overwrite: bool,
        overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError>;

    /// Publish archives one after another.
    async fn publish_many(
        &self,
        paths: &[PathBuf],
        dest: &Selector,
        overwrite: bool,
        overwrite_names: &[String],
    ) -> Vec<Result<PackStatus, PkgError>> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let result = self.publish_one(path, dest, overwrite, overwrite_names).await;
            if let Err(e) = &result {
                warn!(provider = self.name(), path = %path.display(), error = %e, "publish failed");
            }
            results.push(result);
        }
        results
    }

    /// Liveness check with bounded retries.
    async fn check_connection(&self, max_attempts: u32) -> bool;
}

/// Compile a shell-style pattern.
///
/// # Errors
/// Returns `PKG_SELECTOR_INVALID` for malformed patterns.
pub fn compile_pattern(pattern: &str) -> Result<Pattern, PkgError> {
    Pattern::new(pattern).map_err(|e| {
        PkgError::new(
            codes::PKG_SELECTOR_INVALID,
            format!("Invalid pattern '{pattern}': {e}"),
        )
    })
}

/// `*` and `?` never match a leading dot.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: true,
};

/// Match a list entry against a compiled pattern.
#[must_use]
pub fn matches_entry(pattern: &Pattern, entry: &str) -> bool {
    let subject = if pattern.as_str().contains('/') {
        entry
    } else {
        basename(entry)
    };
    pattern.matches_with(subject, MATCH_OPTIONS)
}

/// Whether a list entry is an archive of package `name`.
///
/// `name` may be a bare package name or a full archive file name.
#[must_use]
pub fn is_candidate(entry: &str, name: &str) -> bool {
    let file = basename(entry);
    if is_archive_name(name) {
        return file == basename(name);
    }
    file.strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|rest| rest.ends_with(ARCHIVE_EXT) && !rest.contains('_'))
}

/// Pick the most recent archive among entries. Ties go to the earliest entry.
#[must_use]
pub fn pick_most_recent<S: AsRef<str>>(entries: &[S]) -> Option<&S> {
    let versions: Vec<String> = entries
        .iter()
        .map(|e| {
            parse_filename(e.as_ref())
                .map(|(_, v)| v)
                .unwrap_or_default()
        })
        .collect();
    most_recent_index(versions.iter().map(String::as_str)).map(|i| &entries[i])
}

/// Parse a freshly downloaded archive into metadata owning `temp`.
///
/// Parse failures become an `INVALID` placeholder.
#[must_use]
pub fn metadata_from_download(
    provider: &str,
    name: &str,
    archive: &Path,
    temp: TempDir,
    keep_temp_files: bool,
) -> PackageMetadata {
    let mut meta = match PackageMetadata::parse(ManifestSource::Archive(archive)) {
        Ok(meta) => meta.with_temp_dir(temp).with_provider(provider),
        Err(e) => return metadata_from_error(provider, name, &e),
    };
    if !keep_temp_files {
        meta.release();
    }
    meta
}

/// Placeholder for a failed fetch, logged with context.
///
/// The status is `NOT_FOUND`, `INVALID` or `DOWNLOAD_FAILED`.
#[must_use]
pub fn metadata_from_error(provider: &str, name: &str, error: &PkgError) -> PackageMetadata {
    let mut meta = PackageMetadata::failed(name, error).with_provider(provider);
    match meta.status {
        PackStatus::NotFound => info!(provider, package = name, "package not found"),
        PackStatus::Invalid => {
            warn!(provider, package = name, error = %error, "invalid package");
        }
        _ => {
            warn!(provider, package = name, error = %error, "failed to fetch package");
            meta.status = PackStatus::DownloadFailed;
        }
    }
    meta
}

/// Errors that describe a bad request rather than a per-package outcome.
///
/// These are returned as `Err` from provider calls; everything else is folded
/// into a [`PackStatus`].
#[must_use]
pub fn is_request_error(error: &PkgError) -> bool {
    matches!(
        error.code(),
        codes::PKG_SELECTOR_INVALID | codes::PKG_NOT_IMPLEMENTED | codes::PKG_CONFIG_INVALID
    )
}

/// The archive name `name` refers to, when it is already a full file name.
#[must_use]
pub fn archive_name_of(name: &str, version: Option<&str>) -> String {
    match version {
        Some(v) if !is_archive_name(name) => format_filename(name, v),
        _ => basename(name).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bioc_view_parse() {
        assert_eq!("software".parse::<BiocView>().unwrap(), BiocView::Software);
        assert_eq!(
            "experimentdata".parse::<BiocView>().unwrap(),
            BiocView::ExperimentData
        );
        assert!("workflows".parse::<BiocView>().is_err());
        assert_eq!(BiocView::AnnotationData.segment(), "data/annotation");
    }

    #[test]
    fn test_matches_entry_basename() {
        let p = compile_pattern("Rcpp_*.tar.gz").unwrap();
        assert!(matches_entry(&p, "R-3.1.2/Rcpp_0.12.8.tar.gz"));
        assert!(matches_entry(&p, "Rcpp_0.12.8.tar.gz"));
        assert!(!matches_entry(&p, "RcppEigen_0.3.tar.gz"));
    }

    #[test]
    fn test_matches_entry_with_repo() {
        let p = compile_pattern("R-3.1.2/*").unwrap();
        assert!(matches_entry(&p, "R-3.1.2/Rcpp_0.12.8.tar.gz"));
        assert!(!matches_entry(&p, "Bioc/Rcpp_0.12.8.tar.gz"));
    }

    #[test]
    fn test_leading_dot_not_matched_by_wildcard() {
        let p = compile_pattern("*").unwrap();
        assert!(!matches_entry(&p, ".hidden_1.0.tar.gz"));
        assert!(matches_entry(&p, "visible_1.0.tar.gz"));
        let q = compile_pattern("?hidden*").unwrap();
        assert!(!matches_entry(&q, ".hidden_1.0.tar.gz"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(compile_pattern("[").is_err());
    }

    #[test]
    fn test_is_candidate() {
        assert!(is_candidate("repo/Rcpp_0.12.8.tar.gz", "Rcpp"));
        assert!(!is_candidate("repo/RcppEigen_0.3.tar.gz", "Rcpp"));
        assert!(!is_candidate("Rcpp_0.12.8.zip", "Rcpp"));
        assert!(is_candidate("repo/Rcpp_0.12.8.tar.gz", "Rcpp_0.12.8.tar.gz"));
        assert!(!is_candidate("repo/Rcpp_0.12.9.tar.gz", "Rcpp_0.12.8.tar.gz"));
    }

    #[test]
    fn test_pick_most_recent() {
        let entries = vec![
            "a/Rcpp_0.12.8.tar.gz".to_string(),
            "a/Rcpp_0.12.10.tar.gz".to_string(),
            "b/Rcpp_0.12.10.tar.gz".to_string(),
            "b/Rcpp_0.9.tar.gz".to_string(),
        ];
        assert_eq!(
            pick_most_recent(&entries).map(String::as_str),
            Some("a/Rcpp_0.12.10.tar.gz")
        );
        let empty: Vec<String> = Vec::new();
        assert!(pick_most_recent(&empty).is_none());
    }

    #[test]
    fn test_archive_name_of() {
        assert_eq!(archive_name_of("Rcpp", Some("1.0")), "Rcpp_1.0.tar.gz");
        assert_eq!(archive_name_of("r/Rcpp_1.0.tar.gz", None), "Rcpp_1.0.tar.gz");
    }
}
