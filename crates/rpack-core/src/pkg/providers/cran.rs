//! CRAN snapshots served by MRAN.

use super::{download_status, fetch_archive_metadata};
use crate::pkg::error::PkgError;
use crate::pkg::filename::{basename, is_archive_name};
use crate::pkg::http::{
    build_client, check_reachable, get_text, join_url, HttpOptions, RETRY_INITIAL_BACKOFF,
};
use crate::pkg::metadata::{PackStatus, PackageMetadata};
use crate::pkg::provider::{
    is_candidate, is_request_error, metadata_from_error, pick_most_recent, Provider, Selector,
};
use crate::pkg::tarball::download_to;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use regex_lite::Regex;
use reqwest::Client;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

/// Default MRAN base URL.
pub const DEFAULT_MRAN_URL: &str = "https://mran.revolutionanalytics.com";

const SNAPSHOT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Snapshot dates grouped by the R release they were taken for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotListing {
    /// R version to snapshot dates, dates ascending.
    pub versions: BTreeMap<String, Vec<String>>,
    /// Banners with exactly one R version.
    pub ok: usize,
    /// Banners with no or several R versions.
    pub skipped: usize,
    /// Banners that could not be fetched.
    pub errors: usize,
}

enum Banner {
    Version(String),
    Skipped,
    Error,
}

/// Read-only CRAN mirror addressed by snapshot date.
#[derive(Debug)]
pub struct CranProvider {
    name: String,
    base_url: String,
    http: Client,
    scrape_concurrency: usize,
    href: Regex,
    r_release: Regex,
    latest: OnceCell<String>,
}

impl CranProvider {
    /// # Errors
    /// Returns `PKG_CONFIG_INVALID` for a malformed base URL.
    pub fn new(name: &str, base_url: Option<&str>, scrape_concurrency: usize) -> Result<Self, PkgError> {
        let base_url = base_url.unwrap_or(DEFAULT_MRAN_URL);
        Url::parse(base_url).map_err(|e| {
            PkgError::config_invalid(format!("Invalid CRAN URL '{base_url}': {e}"))
        })?;
        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http: build_client(&HttpOptions::default())?,
            scrape_concurrency: scrape_concurrency.max(1),
            href: compile(r#"href="([^"]+)""#)?,
            r_release: compile(r"R-(\d+\.\d+\.\d+)\.tar\.gz")?,
            latest: OnceCell::new(),
        })
    }

    fn snapshots_url(&self) -> String {
        join_url(&self.base_url, "snapshot/")
    }

    fn contrib_url(&self, date: &str) -> String {
        join_url(&self.base_url, &format!("snapshot/{date}/src/contrib/"))
    }

    fn banner_url(&self, date: &str) -> String {
        join_url(&self.base_url, &format!("snapshot/{date}/banner.shtml"))
    }

    fn hrefs<'a>(&self, html: &'a str) -> Vec<&'a str> {
        self.href
            .captures_iter(html)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// All snapshot dates in the index, ascending.
    pub async fn snapshot_dates(&self) -> Result<Vec<String>, PkgError> {
        let html = get_text(&self.http, &self.snapshots_url(), None).await?;
        let dates: BTreeSet<String> = self
            .hrefs(&html)
            .into_iter()
            .map(|href| href.trim_end_matches('/'))
            .filter(|href| is_snapshot_date(href))
            .map(String::from)
            .collect();
        Ok(dates.into_iter().collect())
    }

    /// Most recent snapshot, looked up once per provider.
    pub async fn latest_snapshot(&self) -> Result<String, PkgError> {
        self.latest
            .get_or_try_init(|| async {
                self.snapshot_dates()
                    .await?
                    .pop()
                    .ok_or_else(|| PkgError::registry("The snapshot index is empty"))
            })
            .await
            .cloned()
    }

    async fn snapshot_of(&self, selector: &Selector) -> Result<String, PkgError> {
        match selector {
            Selector::Snapshot(date) if is_snapshot_date(date) => Ok(date.clone()),
            Selector::Snapshot(_) => Err(PkgError::selector_invalid(
                &self.name,
                "a snapshot date formatted YYYY-MM-DD",
            )),
            Selector::Any => self.latest_snapshot().await,
            _ => Err(PkgError::selector_invalid(&self.name, "a snapshot date")),
        }
    }

    async fn banner(&self, date: &str) -> Banner {
        match get_text(&self.http, &self.banner_url(date), None).await {
            Ok(html) => {
                let found: BTreeSet<&str> = self
                    .r_release
                    .captures_iter(&html)
                    .filter_map(|c| c.get(1).map(|m| m.as_str()))
                    .collect();
                let mut found = found.into_iter();
                match (found.next(), found.next()) {
                    (Some(version), None) => Banner::Version(version.to_string()),
                    _ => {
                        debug!(provider = %self.name, date, "no single R version in banner");
                        Banner::Skipped
                    }
                }
            }
            Err(e) => {
                warn!(provider = %self.name, date, error = %e, "cannot read snapshot banner");
                Banner::Error
            }
        }
    }

    /// Group snapshot dates by R version, optionally keeping one version.
    pub async fn list_snapshots(&self, r_version: Option<&str>) -> Result<SnapshotListing, PkgError> {
        let dates = self.snapshot_dates().await?;
        info!(provider = %self.name, count = dates.len(), "scanning snapshot banners");

        let banners: Vec<(String, Banner)> = stream::iter(dates)
            .map(|date| async move {
                let banner = self.banner(&date).await;
                (date, banner)
            })
            .buffered(self.scrape_concurrency)
            .collect()
            .await;

        let mut listing = SnapshotListing::default();
        for (date, banner) in banners {
            match banner {
                Banner::Version(version) => {
                    listing.ok += 1;
                    if r_version.map_or(true, |wanted| wanted == version) {
                        listing.versions.entry(version).or_default().push(date);
                    }
                }
                Banner::Skipped => listing.skipped += 1,
                Banner::Error => listing.errors += 1,
            }
        }
        info!(
            provider = %self.name,
            ok = listing.ok,
            skipped = listing.skipped,
            errors = listing.errors,
            "snapshot scan finished"
        );
        Ok(listing)
    }

    async fn locate(&self, name: &str, selector: &Selector) -> Result<Option<(String, String)>, PkgError> {
        let date = self.snapshot_of(selector).await?;
        let files = self.list(&Selector::Snapshot(date.clone())).await?;
        let candidates: Vec<&String> = files.iter().filter(|f| is_candidate(f, name)).collect();
        Ok(pick_most_recent(&candidates).map(|file| (date, (*file).clone())))
    }

    fn archive_url(&self, date: &str, file: &str) -> String {
        join_url(&self.contrib_url(date), file)
    }
}

fn compile(pattern: &str) -> Result<Regex, PkgError> {
    Regex::new(pattern)
        .map_err(|e| PkgError::config_invalid(format!("Invalid pattern '{pattern}': {e}")))
}

/// `YYYY-MM-DD` naming a real calendar day.
#[must_use]
pub fn is_snapshot_date(s: &str) -> bool {
    s.len() == 10 && NaiveDate::parse_from_str(s, SNAPSHOT_DATE_FORMAT).is_ok()
}

impl Provider for CranProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// Archive names of one snapshot (the latest when unspecified).
    async fn list(&self, selector: &Selector) -> Result<Vec<String>, PkgError> {
        let date = self.snapshot_of(selector).await?;
        let html = get_text(&self.http, &self.contrib_url(&date), None).await?;
        let files: BTreeSet<String> = self
            .hrefs(&html)
            .into_iter()
            .map(basename)
            .filter(|href| is_archive_name(href))
            .map(String::from)
            .collect();
        Ok(files.into_iter().collect())
    }

    async fn fetch_metadata(
        &self,
        name: &str,
        selector: &Selector,
        keep_temp_files: bool,
    ) -> Result<PackageMetadata, PkgError> {
        let (date, file) = match self.locate(name, selector).await {
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
            &self.archive_url(&date, &file),
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
        let (date, file) = match self.locate(name, selector).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                info!(provider = %self.name, package = name, "package not found");
                return Ok(PackStatus::NotFound);
            }
            Err(e) if is_request_error(&e) => return Err(e),
            Err(e) => return Ok(download_status(&self.name, name, Err(e))),
        };

        let result = download_to(&self.http, &self.archive_url(&date, &file), dest, &file, None).await;
        Ok(download_status(&self.name, name, result))
    }

    async fn publish_one(
        &self,
        _path: &Path,
        _dest: &Selector,
        _overwrite: bool,
        _overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError> {
        Err(PkgError::not_implemented("Uploading to CRAN"))
    }

    async fn check_connection(&self, max_attempts: u32) -> bool {
        check_reachable(
            &self.http,
            &self.snapshots_url(),
            None,
            max_attempts,
            RETRY_INITIAL_BACKOFF,
        )
        .await
    }
}
