//! Local filesystem repository.

use crate::config::LocalRepoConfig;
use crate::pkg::error::PkgError;
use crate::pkg::filename::{basename, parse_filename, ARCHIVE_EXT};
use crate::pkg::metadata::{ManifestSource, PackStatus, PackageMetadata};
use crate::pkg::provider::{
    is_candidate, is_request_error, metadata_from_error, pick_most_recent, Provider, Selector,
};
use rpack_util::fs::copy_into_dir;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Archives laid out as `<base>/<repo>/<name>_<version>.tar.gz`.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    name: String,
    base: PathBuf,
    repos: Vec<String>,
}

impl LocalProvider {
    /// # Errors
    /// Returns `PKG_CONFIG_INVALID` when the base directory or a repo folder
    /// does not exist.
    pub fn new(name: &str, config: &LocalRepoConfig) -> Result<Self, PkgError> {
        if !config.baseurl.is_dir() {
            return Err(PkgError::config_invalid(format!(
                "Local repository base {} does not exist",
                config.baseurl.display()
            )));
        }
        if config.repos.is_empty() {
            return Err(PkgError::config_invalid(format!(
                "Local instance '{name}' has no repos"
            )));
        }
        for repo in &config.repos {
            let dir = config.baseurl.join(repo);
            if !dir.is_dir() {
                return Err(PkgError::config_invalid(format!(
                    "Local repository folder {} does not exist",
                    dir.display()
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            base: config.baseurl.clone(),
            repos: config.repos.clone(),
        })
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    #[must_use]
    pub fn repos(&self) -> &[String] {
        &self.repos
    }

    fn repos_of<'a>(&'a self, selector: &'a Selector) -> Result<Vec<&'a str>, PkgError> {
        match selector {
            Selector::Any => Ok(self.repos.iter().map(String::as_str).collect()),
            Selector::Repo(repo) if self.repos.contains(repo) => Ok(vec![repo.as_str()]),
            Selector::Repo(repo) => Err(PkgError::selector_invalid(
                &self.name,
                &format!("one of the configured repos ({}), not '{repo}'", self.repos.join(", ")),
            )),
            _ => Err(PkgError::selector_invalid(&self.name, "a repo folder")),
        }
    }

    /// Archives of one repo folder, as `repo/file`, sorted.
    fn list_repo(&self, repo: &str) -> Result<Vec<String>, PkgError> {
        let dir = self.base.join(repo);
        let pattern = format!(
            "{}/*{ARCHIVE_EXT}",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let paths = glob::glob(&pattern).map_err(|e| PkgError::io(e.to_string()))?;

        let mut entries = Vec::new();
        for path in paths {
            let path = path.map_err(|e| PkgError::io(e.to_string()))?;
            if path.is_file() {
                entries.push(format!("{repo}/{}", basename(&path.to_string_lossy())));
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn locate(&self, name: &str, selector: &Selector) -> Result<Option<PathBuf>, PkgError> {
        let (selector, package) = match name.split_once('/') {
            Some((repo, package)) => (Selector::Repo(repo.to_string()), package),
            None => (selector.clone(), name),
        };
        let mut candidates = Vec::new();
        for repo in self.repos_of(&selector)? {
            candidates.extend(
                self.list_repo(repo)?
                    .into_iter()
                    .filter(|entry| is_candidate(entry, package)),
            );
        }
        Ok(pick_most_recent(&candidates).map(|entry| self.base.join(entry)))
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// Archives as paths relative to the base directory.
    async fn list(&self, selector: &Selector) -> Result<Vec<String>, PkgError> {
        let mut entries = Vec::new();
        for repo in self.repos_of(selector)? {
            entries.extend(self.list_repo(repo)?);
        }
        Ok(entries)
    }

    async fn fetch_metadata(
        &self,
        name: &str,
        selector: &Selector,
        _keep_temp_files: bool,
    ) -> Result<PackageMetadata, PkgError> {
        let path = match self.locate(name, selector) {
            Ok(Some(path)) => path,
            Ok(None) => {
                return Ok(metadata_from_error(&self.name, name, &PkgError::not_found(name)))
            }
            Err(e) if is_request_error(&e) => return Err(e),
            Err(e) => return Ok(metadata_from_error(&self.name, name, &e)),
        };

        match PackageMetadata::parse(ManifestSource::Archive(&path)) {
            Ok(meta) => Ok(meta.with_provider(&self.name)),
            Err(e) => Ok(metadata_from_error(&self.name, name, &e)),
        }
    }

    async fn download_one(
        &self,
        name: &str,
        selector: &Selector,
        dest: &Path,
    ) -> Result<PackStatus, PkgError> {
        let path = match self.locate(name, selector) {
            Ok(Some(path)) => path,
            Ok(None) => {
                info!(provider = %self.name, package = name, "package not found");
                return Ok(PackStatus::NotFound);
            }
            Err(e) if is_request_error(&e) => return Err(e),
            Err(e) => {
                warn!(provider = %self.name, package = name, error = %e, "cannot list repository");
                return Ok(PackStatus::DownloadFailed);
            }
        };

        match copy_into_dir(&path, dest) {
            Ok(target) => {
                info!(provider = %self.name, package = name, path = %target.display(), "copied");
                Ok(PackStatus::Downloaded)
            }
            Err(e) => {
                warn!(provider = %self.name, package = name, error = %e, "copy failed");
                Ok(PackStatus::DownloadFailed)
            }
        }
    }

    async fn publish_one(
        &self,
        path: &Path,
        dest: &Selector,
        overwrite: bool,
        overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError> {
        let repo = match dest {
            Selector::Repo(_) => self.repos_of(dest)?[0],
            _ => return Err(PkgError::selector_invalid(&self.name, "a destination repo folder")),
        };

        let file = basename(&path.to_string_lossy()).to_string();
        let package = match parse_filename(&file) {
            Ok((package, _)) => package,
            Err(e) => {
                warn!(provider = %self.name, path = %path.display(), error = %e, "refusing to publish");
                return Ok(PackStatus::Invalid);
            }
        };

        let dest_dir = self.base.join(repo);
        if dest_dir.join(&file).exists() && !overwrite && !overwrite_names.contains(&package) {
            info!(provider = %self.name, repo, file, "already deployed");
            return Ok(PackStatus::Deployed);
        }

        match copy_into_dir(path, &dest_dir) {
            Ok(_) => {
                info!(provider = %self.name, repo, file, "deployed");
                Ok(PackStatus::Deployed)
            }
            Err(e) => {
                warn!(provider = %self.name, repo, file, error = %e, "copy failed");
                Ok(PackStatus::DeployFailed)
            }
        }
    }

    async fn check_connection(&self, _max_attempts: u32) -> bool {
        self.base.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::description::tests::build_archive;
    use crate::pkg::error::codes;
    use tempfile::{tempdir, TempDir};

    fn archive(dir: &Path, name: &str, version: &str, imports: &str) -> PathBuf {
        let manifest = format!(
            "Package: {name}\nVersion: {version}\nLicense: MIT\nImports: {imports}\n"
        );
        let path = dir.join(format!("{name}_{version}.tar.gz"));
        std::fs::write(
            &path,
            build_archive(&[(&format!("{name}/DESCRIPTION"), &manifest)]),
        )
        .unwrap();
        path
    }

    fn repo() -> (TempDir, LocalProvider) {
        let dir = tempdir().unwrap();
        for repo in ["cran", "bioc"] {
            std::fs::create_dir(dir.path().join(repo)).unwrap();
        }
        archive(&dir.path().join("cran"), "Rcpp", "0.12.8", "methods");
        archive(&dir.path().join("cran"), "Rcpp", "0.12.10", "methods, utils");
        archive(&dir.path().join("bioc"), "a4", "1.24.0", "a4Core");
        std::fs::write(dir.path().join("cran").join(".hidden_1.0.tar.gz"), b"x").unwrap();
        std::fs::write(dir.path().join("cran").join("README"), b"x").unwrap();

        let config = LocalRepoConfig {
            baseurl: dir.path().to_path_buf(),
            repos: vec!["cran".into(), "bioc".into()],
        };
        let provider = LocalProvider::new("mirror", &config).unwrap();
        (dir, provider)
    }

    #[test]
    fn test_missing_folder_rejected() {
        let dir = tempdir().unwrap();
        let config = LocalRepoConfig {
            baseurl: dir.path().to_path_buf(),
            repos: vec!["nope".into()],
        };
        let err = LocalProvider::new("mirror", &config).unwrap_err();
        assert_eq!(err.code(), codes::PKG_CONFIG_INVALID);
    }

    #[tokio::test]
    async fn test_list_and_find() {
        let (_dir, p) = repo();
        let all = p.list(&Selector::Any).await.unwrap();
        assert!(all.contains(&"cran/Rcpp_0.12.10.tar.gz".to_string()));
        assert!(all.contains(&"bioc/a4_1.24.0.tar.gz".to_string()));
        assert!(!all.iter().any(|e| e.ends_with("README")));

        let found = p.find("Rcpp_*", &Selector::Any).await.unwrap();
        assert_eq!(found.len(), 2);

        let stars = p.find("*", &Selector::Repo("cran".into())).await.unwrap();
        assert!(!stars.iter().any(|e| e.contains(".hidden")));
    }

    #[tokio::test]
    async fn test_unknown_repo_rejected() {
        let (_dir, p) = repo();
        let err = p.list(&Selector::Repo("other".into())).await.unwrap_err();
        assert_eq!(err.code(), codes::PKG_SELECTOR_INVALID);
    }

    #[tokio::test]
    async fn test_fetch_picks_most_recent() {
        let (_dir, p) = repo();
        let meta = p.fetch_metadata("Rcpp", &Selector::Any, false).await.unwrap();
        assert_eq!(meta.version.as_deref(), Some("0.12.10"));
        assert_eq!(meta.imports, vec!["methods", "utils"]);
        assert_eq!(meta.provider.as_deref(), Some("mirror"));

        let addressed = p
            .fetch_metadata("bioc/a4", &Selector::Any, false)
            .await
            .unwrap();
        assert_eq!(addressed.version.as_deref(), Some("1.24.0"));
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let (_dir, p) = repo();
        let meta = p.fetch_metadata("ggplot2", &Selector::Any, false).await.unwrap();
        assert_eq!(meta.status, PackStatus::NotFound);
    }

    #[tokio::test]
    async fn test_fetch_corrupt_is_invalid() {
        let (dir, p) = repo();
        std::fs::write(dir.path().join("cran").join("broken_1.0.tar.gz"), b"garbage").unwrap();
        let meta = p.fetch_metadata("broken", &Selector::Any, false).await.unwrap();
        assert_eq!(meta.status, PackStatus::Invalid);
    }

    #[tokio::test]
    async fn test_download_many_preserves_order() {
        let (_dir, p) = repo();
        let dest = tempdir().unwrap();
        let names = vec!["a4".to_string(), "nothere".to_string(), "Rcpp".to_string()];
        let statuses = p.download_many(&names, &Selector::Any, dest.path(), 2).await;
        assert_eq!(
            statuses,
            vec![PackStatus::Downloaded, PackStatus::NotFound, PackStatus::Downloaded]
        );
        assert!(dest.path().join("Rcpp_0.12.10.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_publish_overwrite_semantics() {
        let (dir, p) = repo();
        let staging = tempdir().unwrap();
        let new = archive(staging.path(), "Rcpp", "0.12.8", "Rcpp");
        let target = dir.path().join("cran").join("Rcpp_0.12.8.tar.gz");
        let before = std::fs::read(&target).unwrap();

        let dest = Selector::Repo("cran".into());
        let status = p.publish_one(&new, &dest, false, &[]).await.unwrap();
        assert_eq!(status, PackStatus::Deployed);
        assert_eq!(std::fs::read(&target).unwrap(), before);

        let status = p
            .publish_one(&new, &dest, false, &["Rcpp".to_string()])
            .await
            .unwrap();
        assert_eq!(status, PackStatus::Deployed);
        assert_ne!(std::fs::read(&target).unwrap(), before);
    }

    #[tokio::test]
    async fn test_publish_requires_configured_repo() {
        let (_dir, p) = repo();
        let staging = tempdir().unwrap();
        let new = archive(staging.path(), "x", "1.0", "y");
        assert!(p.publish_one(&new, &Selector::Any, false, &[]).await.is_err());
        assert!(p
            .publish_one(&new, &Selector::Repo("zzz".into()), false, &[])
            .await
            .is_err());
    }
}
