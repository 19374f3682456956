//! Artifactory repository manager backend.

use super::{download_status, fetch_archive_metadata};
use crate::config::ArtifactoryConfig;
use crate::pkg::error::PkgError;
use crate::pkg::filename::{basename, is_archive_name, parse_filename};
use crate::pkg::http::{
    build_client, check_reachable, get_text, join_url, with_auth, Credentials, HttpOptions,
    RETRY_INITIAL_BACKOFF,
};
use crate::pkg::metadata::{PackStatus, PackageMetadata};
use crate::pkg::provider::{
    is_candidate, is_request_error, metadata_from_error, pick_most_recent, Provider, Selector,
};
use crate::pkg::tarball::download_to;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

/// Storage API folder listing.
#[derive(Debug, Deserialize)]
struct StorageListing {
    #[serde(default)]
    children: Vec<StorageChild>,
}

#[derive(Debug, Deserialize)]
struct StorageChild {
    uri: String,
    #[serde(default)]
    folder: bool,
}

/// A package archive located in one repo folder.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Located {
    repo: String,
    file: String,
}

impl AsRef<str> for Located {
    fn as_ref(&self) -> &str {
        &self.file
    }
}

/// Artifactory instance with a flat namespace per repo folder.
#[derive(Debug, Clone)]
pub struct ArtifactoryProvider {
    name: String,
    base_url: String,
    repos: Vec<String>,
    auth: Option<Credentials>,
    http: Client,
}

impl ArtifactoryProvider {
    /// Build the provider and its HTTP client.
    ///
    /// # Errors
    /// Returns `PKG_CONFIG_INVALID` for a malformed base URL, an empty repo
    /// list or an unreadable CA bundle.
    pub fn new(name: &str, config: &ArtifactoryConfig) -> Result<Self, PkgError> {
        Url::parse(&config.baseurl).map_err(|e| {
            PkgError::config_invalid(format!(
                "Invalid Artifactory URL '{}': {e}",
                config.baseurl
            ))
        })?;
        if config.repos.is_empty() {
            return Err(PkgError::config_invalid(format!(
                "Artifactory instance '{name}' has no repos"
            )));
        }

        let http = build_client(&HttpOptions {
            verify_tls: config.verify,
            ca_cert: config.ca_cert.clone(),
            ..Default::default()
        })?;

        let auth = match (&config.user, &config.password) {
            (Some(user), Some(password)) => Some(Credentials {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            name: name.to_string(),
            base_url: config.baseurl.trim_end_matches('/').to_string(),
            repos: config.repos.clone(),
            auth,
            http,
        })
    }

    /// Configured repo folders, in search order.
    #[must_use]
    pub fn repos(&self) -> &[String] {
        &self.repos
    }

    fn storage_url(&self, repo: &str) -> String {
        join_url(&self.base_url, &format!("api/storage/{repo}"))
    }

    fn file_url(&self, repo: &str, file: &str) -> String {
        join_url(&self.base_url, &format!("{repo}/{file}"))
    }

    /// Archive files of one repo folder.
    async fn list_repo(&self, repo: &str) -> Result<Vec<String>, PkgError> {
        let text = get_text(&self.http, &self.storage_url(repo), self.auth.as_ref()).await?;
        let listing: StorageListing = serde_json::from_str(&text)?;
        Ok(listing
            .children
            .into_iter()
            .filter(|child| !child.folder)
            .map(|child| child.uri.trim_start_matches('/').to_string())
            .filter(|file| is_archive_name(file))
            .collect())
    }

    async fn entries(&self, selector: &Selector) -> Result<Vec<Located>, PkgError> {
        let repos: Vec<&str> = match selector {
            Selector::Any => self.repos.iter().map(String::as_str).collect(),
            Selector::Repo(repo) => vec![repo.as_str()],
            _ => return Err(PkgError::selector_invalid(&self.name, "a repo folder")),
        };

        let scanning = matches!(selector, Selector::Any);
        let mut entries = Vec::new();
        let mut listed = 0;
        let mut last_error = None;
        for repo in repos {
            let files = match self.list_repo(repo).await {
                Ok(files) => files,
                Err(e) if scanning => {
                    warn!(provider = %self.name, repo, error = %e, "skipping repo folder");
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            listed += 1;
            debug!(provider = %self.name, repo, count = files.len(), "listed repo");
            entries.extend(files.into_iter().map(|file| Located {
                repo: repo.to_string(),
                file,
            }));
        }
        match last_error {
            Some(e) if listed == 0 => Err(e),
            _ => Ok(entries),
        }
    }

    /// Resolve `name` (or `repo/name`) to its most recent archive.
    async fn locate(&self, name: &str, selector: &Selector) -> Result<Option<Located>, PkgError> {
        let (selector, package) = match name.split_once('/') {
            Some((repo, package)) => (Selector::Repo(repo.to_string()), package),
            None => (selector.clone(), name),
        };
        let candidates: Vec<Located> = self
            .entries(&selector)
            .await?
            .into_iter()
            .filter(|entry| is_candidate(&entry.file, package))
            .collect();
        Ok(pick_most_recent(&candidates).cloned())
    }
}

/// Whether an upload response body reports a failure despite a 2xx status.
fn upload_rejected(body: &str) -> bool {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| value.get("errors").map(serde_json::Value::is_array))
        .unwrap_or(false)
}

impl Provider for ArtifactoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// Archive names; prefixed with `repo/` when listing every repo.
    async fn list(&self, selector: &Selector) -> Result<Vec<String>, PkgError> {
        let entries = self.entries(selector).await?;
        Ok(match selector {
            Selector::Any => entries
                .into_iter()
                .map(|e| format!("{}/{}", e.repo, e.file))
                .collect(),
            _ => entries.into_iter().map(|e| e.file).collect(),
        })
    }

    async fn fetch_metadata(
        &self,
        name: &str,
        selector: &Selector,
        keep_temp_files: bool,
    ) -> Result<PackageMetadata, PkgError> {
        let located = match self.locate(name, selector).await {
            Ok(Some(located)) => located,
            Ok(None) => {
                return Ok(metadata_from_error(&self.name, name, &PkgError::not_found(name)))
            }
            Err(e) if is_request_error(&e) => return Err(e),
            Err(e) => return Ok(metadata_from_error(&self.name, name, &e)),
        };

        let url = self.file_url(&located.repo, &located.file);
        Ok(fetch_archive_metadata(
            &self.name,
            &self.http,
            &url,
            &located.file,
            basename(name),
            self.auth.as_ref(),
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
        let located = match self.locate(name, selector).await {
            Ok(Some(located)) => located,
            Ok(None) => {
                info!(provider = %self.name, package = name, "package not found");
                return Ok(PackStatus::NotFound);
            }
            Err(e) if is_request_error(&e) => return Err(e),
            Err(e) => return Ok(download_status(&self.name, name, Err(e))),
        };

        let url = self.file_url(&located.repo, &located.file);
        let result = download_to(&self.http, &url, dest, &located.file, self.auth.as_ref()).await;
        Ok(download_status(&self.name, name, result))
    }

    async fn publish_one(
        &self,
        path: &Path,
        dest: &Selector,
        overwrite: bool,
        overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError> {
        let Selector::Repo(repo) = dest else {
            return Err(PkgError::selector_invalid(&self.name, "a destination repo folder"));
        };

        let file = basename(&path.to_string_lossy()).to_string();
        let package = match parse_filename(&file) {
            Ok((package, _)) => package,
            Err(e) => {
                warn!(provider = %self.name, path = %path.display(), error = %e, "refusing to upload");
                return Ok(PackStatus::Invalid);
            }
        };

        if !overwrite && !overwrite_names.contains(&package) {
            match self.list_repo(repo).await {
                Ok(files) if files.contains(&file) => {
                    info!(provider = %self.name, repo = %repo, file, "already deployed");
                    return Ok(PackStatus::Deployed);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(provider = %self.name, repo = %repo, error = %e, "cannot list destination");
                    return Ok(PackStatus::DeployFailed);
                }
            }
        }

        let body = tokio::fs::read(path).await?;
        let url = self.file_url(repo, &file);
        let response = match with_auth(self.http.put(&url), self.auth.as_ref())
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(provider = %self.name, url, error = %e, "upload failed");
                return Ok(PackStatus::DeployFailed);
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() || upload_rejected(&text) {
            warn!(provider = %self.name, url, status = %status, "upload rejected");
            return Ok(PackStatus::DeployFailed);
        }

        info!(provider = %self.name, repo = %repo, file, "deployed");
        Ok(PackStatus::Deployed)
    }

    async fn check_connection(&self, max_attempts: u32) -> bool {
        check_reachable(
            &self.http,
            &self.base_url,
            self.auth.as_ref(),
            max_attempts,
            RETRY_INITIAL_BACKOFF,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(repos: &[&str]) -> ArtifactoryConfig {
        ArtifactoryConfig {
            baseurl: "https://artifactory.example.com/artifactory/".into(),
            user: Some("john".into()),
            password: Some("secret".into()),
            verify: true,
            ca_cert: None,
            repos: repos.iter().map(|r| (*r).to_string()).collect(),
        }
    }

    #[test]
    fn test_urls() {
        let p = ArtifactoryProvider::new("arti", &config(&["R-3.1.2"])).unwrap();
        assert_eq!(
            p.storage_url("R-3.1.2"),
            "https://artifactory.example.com/artifactory/api/storage/R-3.1.2"
        );
        assert_eq!(
            p.file_url("R-3.1.2", "Rcpp_0.12.8.tar.gz"),
            "https://artifactory.example.com/artifactory/R-3.1.2/Rcpp_0.12.8.tar.gz"
        );
        assert_eq!(p.repos(), ["R-3.1.2"]);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut c = config(&["R"]);
        c.baseurl = "not a url".into();
        assert!(ArtifactoryProvider::new("arti", &c).is_err());
    }

    #[test]
    fn test_no_repos_rejected() {
        assert!(ArtifactoryProvider::new("arti", &config(&[])).is_err());
    }

    #[test]
    fn test_upload_rejected() {
        assert!(upload_rejected("<html><body>Bad</body></html>"));
        assert!(upload_rejected(r#"{"errors":[{"status":403,"message":"Forbidden"}]}"#));
        assert!(!upload_rejected(r#"{"repo":"R","path":"/Rcpp_1.0.tar.gz"}"#));
        assert!(!upload_rejected(""));
    }

    #[tokio::test]
    async fn test_bad_selector() {
        let p = ArtifactoryProvider::new("arti", &config(&["R"])).unwrap();
        let err = p
            .list(&Selector::Snapshot("2017-01-01".into()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_SELECTOR_INVALID);
    }
}
