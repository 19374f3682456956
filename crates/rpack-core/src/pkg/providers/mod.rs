//! Provider backends and instance construction.

pub mod artifactory;
pub mod bioconductor;
pub mod cran;
pub mod local;
pub mod multi;
pub mod renv;

pub use artifactory::ArtifactoryProvider;
pub use bioconductor::{parse_package_index, BiocProvider, DEFAULT_BIOC_URL};
pub use cran::{is_snapshot_date, CranProvider, SnapshotListing, DEFAULT_MRAN_URL};
pub use local::LocalProvider;
pub use multi::MultiProvider;
pub use renv::{install_failure, REnvProvider, DEFAULT_INSTALL_TIMEOUT, INSTALL_SCRIPT};

use super::error::PkgError;
use super::http::Credentials;
use super::metadata::{PackStatus, PackageMetadata};
use super::provider::{metadata_from_download, metadata_from_error, Provider, Selector};
use super::tarball::download_to;
use crate::config::{InstanceKind, ReposConfig};
use crate::error::Error;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Download `url` into a fresh temp dir and parse it.
pub(crate) async fn fetch_archive_metadata(
    provider: &str,
    http: &Client,
    url: &str,
    file: &str,
    name: &str,
    auth: Option<&Credentials>,
    keep_temp_files: bool,
) -> PackageMetadata {
    let temp = match tempfile::Builder::new().prefix("rpack-").tempdir() {
        Ok(temp) => temp,
        Err(e) => return metadata_from_error(provider, name, &e.into()),
    };
    match download_to(http, url, temp.path(), file, auth).await {
        Ok(path) => metadata_from_download(provider, name, &path, temp, keep_temp_files),
        Err(e) => metadata_from_error(provider, name, &e),
    }
}

/// Fold a download result into a status, logging failures.
pub(crate) fn download_status(
    provider: &str,
    name: &str,
    result: Result<PathBuf, PkgError>,
) -> PackStatus {
    match result {
        Ok(path) => {
            info!(provider, package = name, path = %path.display(), "downloaded");
            PackStatus::Downloaded
        }
        Err(e) if e.status() == PackStatus::NotFound => {
            info!(provider, package = name, "package not found");
            PackStatus::NotFound
        }
        Err(e) => {
            warn!(provider, package = name, error = %e, "download failed");
            PackStatus::DownloadFailed
        }
    }
}

/// A configured provider instance.
#[derive(Debug)]
pub enum Backend {
    Artifactory(ArtifactoryProvider),
    Local(LocalProvider),
    REnvironment(REnvProvider),
    Cran(CranProvider),
    Bioconductor(BiocProvider),
}

macro_rules! dispatch {
    ($self:ident, $p:ident => $body:expr) => {
        match $self {
            Backend::Artifactory($p) => $body,
            Backend::Local($p) => $body,
            Backend::REnvironment($p) => $body,
            Backend::Cran($p) => $body,
            Backend::Bioconductor($p) => $body,
        }
    };
}

impl Backend {
    /// Build the instance called `name`.
    ///
    /// Construction checks paths and URLs but does not check connectivity.
    pub fn from_config(config: &ReposConfig, name: &str) -> Result<Self, Error> {
        let settings = &config.settings;
        let backend = match config.kind_of(name) {
            Some(InstanceKind::Cran) => Self::Cran(CranProvider::new(
                name,
                config.cran.baseurl.as_deref(),
                settings.scrape_concurrency(),
            )?),
            Some(InstanceKind::Bioconductor) => Self::Bioconductor(BiocProvider::new(
                name,
                config.bioc.baseurl.as_deref(),
                settings.scrape_concurrency(),
            )?),
            Some(InstanceKind::Artifactory) => {
                let arti = config
                    .artifactory
                    .get(name)
                    .ok_or_else(|| config.unknown_instance(name))?;
                Self::Artifactory(ArtifactoryProvider::new(name, arti)?)
            }
            Some(InstanceKind::Local) => {
                let local = config
                    .local
                    .get(name)
                    .ok_or_else(|| config.unknown_instance(name))?;
                Self::Local(LocalProvider::new(name, local)?)
            }
            Some(InstanceKind::REnvironment) => {
                let renv = config
                    .renvironment
                    .get(name)
                    .ok_or_else(|| config.unknown_instance(name))?;
                Self::REnvironment(
                    REnvProvider::new(name, renv)?
                        .with_install_timeout(Duration::from_secs(settings.install_timeout_secs)),
                )
            }
            None => return Err(config.unknown_instance(name)),
        };
        Ok(backend)
    }

    #[must_use]
    pub fn kind(&self) -> InstanceKind {
        match self {
            Self::Artifactory(_) => InstanceKind::Artifactory,
            Self::Local(_) => InstanceKind::Local,
            Self::REnvironment(_) => InstanceKind::REnvironment,
            Self::Cran(_) => InstanceKind::Cran,
            Self::Bioconductor(_) => InstanceKind::Bioconductor,
        }
    }

    /// The live R environment behind this instance, if it is one.
    #[must_use]
    pub fn as_renv(&self) -> Option<&REnvProvider> {
        match self {
            Self::REnvironment(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_cran(&self) -> Option<&CranProvider> {
        match self {
            Self::Cran(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bioc(&self) -> Option<&BiocProvider> {
        match self {
            Self::Bioconductor(p) => Some(p),
            _ => None,
        }
    }
}

impl Provider for Backend {
    fn name(&self) -> &str {
        dispatch!(self, p => p.name())
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<String>, PkgError> {
        dispatch!(self, p => p.list(selector).await)
    }

    async fn find(&self, pattern: &str, selector: &Selector) -> Result<Vec<String>, PkgError> {
        dispatch!(self, p => p.find(pattern, selector).await)
    }

    async fn fetch_metadata(
        &self,
        name: &str,
        selector: &Selector,
        keep_temp_files: bool,
    ) -> Result<PackageMetadata, PkgError> {
        dispatch!(self, p => p.fetch_metadata(name, selector, keep_temp_files).await)
    }

    async fn download_one(
        &self,
        name: &str,
        selector: &Selector,
        dest: &Path,
    ) -> Result<PackStatus, PkgError> {
        dispatch!(self, p => p.download_one(name, selector, dest).await)
    }

    async fn download_many(
        &self,
        names: &[String],
        selector: &Selector,
        dest: &Path,
        concurrency: usize,
    ) -> Vec<PackStatus> {
        dispatch!(self, p => p.download_many(names, selector, dest, concurrency).await)
    }

    async fn publish_one(
        &self,
        path: &Path,
        dest: &Selector,
        overwrite: bool,
        overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError> {
        dispatch!(self, p => p.publish_one(path, dest, overwrite, overwrite_names).await)
    }

    async fn check_connection(&self, max_attempts: u32) -> bool {
        dispatch!(self, p => p.check_connection(max_attempts).await)
    }
}
