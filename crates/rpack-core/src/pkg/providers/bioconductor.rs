//! Bioconductor releases.
//!
//! The package index of a release/view is a JavaScript file wrapping a JSON
//! document. It carries names only; the downloadable archive name (name plus
//! version) is scraped from each package's HTML detail page, which is why
//! listing fans out over one request per package.

use super::{download_status, fetch_archive_metadata};
use crate::pkg::error::{codes, PkgError};
use crate::pkg::filename::{basename, is_archive_name, parse_filename};
use crate::pkg::http::{
    build_client, check_reachable, get_text, join_url, HttpOptions, RETRY_INITIAL_BACKOFF,
};
use crate::pkg::metadata::{PackStatus, PackageMetadata};
use crate::pkg::provider::{
    is_candidate, is_request_error, metadata_from_error, BiocView, Provider, Selector,
};
use crate::pkg::tarball::download_to;
use crate::pkg::version::compare;
use futures::stream::{self, StreamExt};
use regex_lite::Regex;
use reqwest::Client;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use url::Url;

/// Default Bioconductor base URL.
pub const DEFAULT_BIOC_URL: &str = "https://www.bioconductor.org";

/// Read-only Bioconductor mirror addressed by release and view.
#[derive(Debug)]
pub struct BiocProvider {
    name: String,
    base_url: String,
    http: Client,
    scrape_concurrency: usize,
    archive_href: Regex,
    release_header: Regex,
    latest: OnceCell<String>,
}

impl BiocProvider {
    /// # Errors
    /// Returns `PKG_CONFIG_INVALID` for a malformed base URL.
    pub fn new(name: &str, base_url: Option<&str>, scrape_concurrency: usize) -> Result<Self, PkgError> {
        let base_url = base_url.unwrap_or(DEFAULT_BIOC_URL);
        Url::parse(base_url).map_err(|e| {
            PkgError::config_invalid(format!("Invalid Bioconductor URL '{base_url}': {e}"))
        })?;
        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http: build_client(&HttpOptions::default())?,
            scrape_concurrency: scrape_concurrency.max(1),
            archive_href: compile(r#"href="([^"]+\.tar\.gz)""#)?,
            release_header: compile(r"<h3[^>]*>\s*Bioconductor\s+(\d+\.\d+)")?,
            latest: OnceCell::new(),
        })
    }

    fn check_results_url(&self) -> String {
        join_url(&self.base_url, "checkResults/")
    }

    fn index_url(&self, release: &str, view: BiocView) -> String {
        join_url(
            &self.base_url,
            &format!("packages/json/{release}/{}/packages.js", view.segment()),
        )
    }

    fn detail_url(&self, release: &str, view: BiocView, package: &str) -> String {
        join_url(
            &self.base_url,
            &format!("packages/{release}/{}/html/{package}.html", view.segment()),
        )
    }

    fn archive_url(&self, release: &str, view: BiocView, file: &str) -> String {
        join_url(
            &self.base_url,
            &format!("packages/{release}/{}/src/contrib/{file}", view.segment()),
        )
    }

    /// Release numbers announced on the check results page, newest first.
    pub async fn list_releases(&self) -> Result<Vec<String>, PkgError> {
        let html = get_text(&self.http, &self.check_results_url(), None).await?;
        let releases: BTreeSet<&str> = self
            .release_header
            .captures_iter(&html)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        let mut releases: Vec<String> = releases.into_iter().map(String::from).collect();
        releases.sort_by(|a, b| compare(b, a));
        Ok(releases)
    }

    /// Newest release, looked up once per provider.
    pub async fn latest_release(&self) -> Result<String, PkgError> {
        self.latest
            .get_or_try_init(|| async {
                self.list_releases()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| PkgError::registry("No Bioconductor release found"))
            })
            .await
            .cloned()
    }

    async fn release_of(&self, selector: &Selector) -> Result<(String, BiocView), PkgError> {
        match selector {
            Selector::Bioc { release, view } => Ok((release.clone(), *view)),
            Selector::Any => Ok((self.latest_release().await?, BiocView::default())),
            _ => Err(PkgError::selector_invalid(&self.name, "a release and a view")),
        }
    }

    /// Package names of a release/view.
    pub async fn package_names(&self, release: &str, view: BiocView) -> Result<Vec<String>, PkgError> {
        let js = get_text(&self.http, &self.index_url(release, view), None).await?;
        parse_package_index(&js)
    }

    /// Archive name of `package` scraped from its detail page.
    ///
    /// `Ok(None)` when the page does not exist.
    pub async fn archive_name(
        &self,
        release: &str,
        view: BiocView,
        package: &str,
    ) -> Result<Option<String>, PkgError> {
        let url = self.detail_url(release, view, package);
        let html = match get_text(&self.http, &url, None).await {
            Ok(html) => html,
            Err(e) if e.code() == codes::PKG_NOT_FOUND => return Ok(None),
            Err(e) => return Err(e),
        };

        let links: BTreeSet<&str> = self
            .archive_href
            .captures_iter(&html)
            .filter_map(|c| c.get(1).map(|m| basename(m.as_str())))
            .filter(|file| is_candidate(file, package))
            .collect();
        let mut links = links.into_iter();
        match (links.next(), links.next()) {
            (Some(file), None) => Ok(Some(file.to_string())),
            _ => Err(PkgError::registry(format!(
                "Could not find a single package source link in {url}"
            ))),
        }
    }

    async fn locate(&self, name: &str, selector: &Selector) -> Result<Option<(String, BiocView, String)>, PkgError> {
        let (release, view) = self.release_of(selector).await?;
        if is_archive_name(name) {
            parse_filename(name)?;
            return Ok(Some((release, view, basename(name).to_string())));
        }
        Ok(self
            .archive_name(&release, view, name)
            .await?
            .map(|file| (release, view, file)))
    }
}

fn compile(pattern: &str) -> Result<Regex, PkgError> {
    Regex::new(pattern)
        .map_err(|e| PkgError::config_invalid(format!("Invalid pattern '{pattern}': {e}")))
}

/// Package names from a `var <view>_packages = {...};` script.
///
/// # Errors
/// Returns `PKG_REGISTRY_ERROR` when the embedded JSON is malformed.
pub fn parse_package_index(js: &str) -> Result<Vec<String>, PkgError> {
    let start = js
        .find('{')
        .ok_or_else(|| PkgError::registry("Package index holds no JSON object"))?;
    let json = js[start..].replace("};", "}");
    let value: serde_json::Value = serde_json::from_str(json.trim())?;
    let content = value
        .get("content")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| PkgError::registry("Package index has no 'content' array"))?;
    Ok(content
        .iter()
        .filter_map(|row| row.get(0).and_then(serde_json::Value::as_str))
        .map(String::from)
        .collect())
}

impl Provider for BiocProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// Archive names of a release/view (the latest software view when unspecified).
    async fn list(&self, selector: &Selector) -> Result<Vec<String>, PkgError> {
        let (release, view) = self.release_of(selector).await?;
        let names = self.package_names(&release, view).await?;
        info!(provider = %self.name, release, view = %view, count = names.len(), "resolving archive names");

        let results: Vec<Result<Option<String>, PkgError>> = stream::iter(&names)
            .map(|name| self.archive_name(&release, view, name))
            .buffered(self.scrape_concurrency)
            .collect()
            .await;

        let mut files = Vec::with_capacity(names.len());
        let mut errors = 0usize;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(Some(file)) => files.push(file),
                Ok(None) => {
                    warn!(provider = %self.name, package = %name, "package page missing");
                    errors += 1;
                }
                Err(e) => {
                    warn!(provider = %self.name, package = %name, error = %e, "cannot resolve archive name");
                    errors += 1;
                }
            }
        }
        info!(provider = %self.name, ok = files.len(), errors, "package pages processed");
        Ok(files)
    }

    async fn fetch_metadata(
        &self,
        name: &str,
        selector: &Selector,
        keep_temp_files: bool,
    ) -> Result<PackageMetadata, PkgError> {
        let (release, view, file) = match self.locate(name, selector).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                return Ok(metadata_from_error(&self.name, name, &PkgError::not_found(name)))
            }
            Err(e) if is_request_error(&e) => return Err(e),
            Err(e) => return Ok(metadata_from_error(&self.name, name, &e)),
        };

        Ok(fetch_archive_metadata(
            &self.name,
            &self.http,
            &self.archive_url(&release, view, &file),
            &file,
            name,
            None,
            keep_temp_files,
        )
        .await)
    }

    async fn download_one(
        &self,
        name: &str,
        selector: &Selector,
        dest: &Path,
    ) -> Result<PackStatus, PkgError> {
        let (release, view, file) = match self.locate(name, selector).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                info!(provider = %self.name, package = name, "package not found");
                return Ok(PackStatus::NotFound);
            }
            Err(e) if is_request_error(&e) => return Err(e),
            Err(e) => return Ok(download_status(&self.name, name, Err(e))),
        };

        let url = self.archive_url(&release, view, &file);
        let result = download_to(&self.http, &url, dest, &file, None).await;
        Ok(download_status(&self.name, name, result))
    }

    async fn publish_one(
        &self,
        _path: &Path,
        _dest: &Selector,
        _overwrite: bool,
        _overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError> {
        Err(PkgError::not_implemented("Uploading to Bioconductor"))
    }

    async fn check_connection(&self, max_attempts: u32) -> bool {
        check_reachable(
            &self.http,
            &self.base_url,
            None,
            max_attempts,
            RETRY_INITIAL_BACKOFF,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_index() {
        let js = r#"var bioc_packages = {"content": [["RGraph2js", "Convert a graph"], ["a4", "Automated"]]};"#;
        assert_eq!(parse_package_index(js).unwrap(), vec!["RGraph2js", "a4"]);
    }

    #[test]
    fn test_parse_package_index_garbage() {
        assert!(parse_package_index("not javascript").is_err());
        assert!(parse_package_index("var x = {\"other\": 1};").is_err());
    }

    #[test]
    fn test_urls() {
        let p = BiocProvider::new("bioc", None, 4).unwrap();
        assert_eq!(
            p.index_url("3.5", BiocView::ExperimentData),
            "https://www.bioconductor.org/packages/json/3.5/data/experiment/packages.js"
        );
        assert_eq!(
            p.detail_url("3.5", BiocView::Software, "RGraph2js"),
            "https://www.bioconductor.org/packages/3.5/bioc/html/RGraph2js.html"
        );
        assert_eq!(
            p.archive_url("3.5", BiocView::AnnotationData, "hgu133a.db_3.2.3.tar.gz"),
            "https://www.bioconductor.org/packages/3.5/data/annotation/src/contrib/hgu133a.db_3.2.3.tar.gz"
        );
    }

    #[tokio::test]
    async fn test_snapshot_selector_rejected() {
        let p = BiocProvider::new("bioc", None, 4).unwrap();
        let err = p
            .fetch_metadata("a4", &Selector::Snapshot("2017-01-01".into()), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::PKG_SELECTOR_INVALID);
    }
}
