//! Package metadata as seen by providers, the resolver and the graph builder.

use super::base::BasePackages;
use super::description::{read_manifest_archive, read_manifest_dir, Manifest};
use super::error::PkgError;
use super::filename::{format_filename, parse_filename};
use super::license::{LicenseClass, LicensePolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Lifecycle status of a package in a provider operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackStatus {
    Parsed,
    Downloaded,
    DownloadFailed,
    Deployed,
    DeployFailed,
    NotFound,
    Invalid,
}

impl PackStatus {
    /// Stable numeric code used in reports.
    #[must_use]
    pub fn code(self) -> i8 {
        match self {
            Self::Parsed => 0,
            Self::Downloaded => 1,
            Self::DownloadFailed => -1,
            Self::Deployed => 2,
            Self::DeployFailed => -2,
            Self::NotFound => -3,
            Self::Invalid => -4,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parsed => "PARSED",
            Self::Downloaded => "DOWNLOADED",
            Self::DownloadFailed => "DOWNLOAD_FAILED",
            Self::Deployed => "DEPLOYED",
            Self::DeployFailed => "DEPLOY_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Invalid => "INVALID",
        }
    }

    /// Failure statuses have negative codes.
    #[must_use]
    pub fn is_failure(self) -> bool {
        self.code() < 0
    }
}

impl fmt::Display for PackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where metadata is read from.
#[derive(Debug, Clone, Copy)]
pub enum ManifestSource<'a> {
    /// A `<name>_<version>.tar.gz` archive.
    Archive(&'a Path),
    /// A directory holding a `DESCRIPTION` (installed or unpacked package).
    Directory(&'a Path),
    /// Just a name; nothing to parse.
    Name(&'a str),
}

/// Dependency relation kinds declared in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Depends,
    Imports,
    Suggests,
    LinkingTo,
}

impl Relation {
    /// All relations in manifest order.
    pub const ALL: [Self; 4] = [Self::Depends, Self::Imports, Self::Suggests, Self::LinkingTo];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Depends => "depends",
            Self::Imports => "imports",
            Self::Suggests => "suggests",
            Self::LinkingTo => "linkingto",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of one package.
///
/// When produced by a provider fetch, the archive may live in a temporary
/// directory owned by this value; dropping the value (or calling
/// [`PackageMetadata::release`]) deletes it.
#[derive(Debug, Serialize)]
pub struct PackageMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    pub depends: Vec<String>,
    pub imports: Vec<String>,
    pub suggests: Vec<String>,
    pub linking_to: Vec<String>,
    pub license_class: LicenseClass,
    pub install_allowed: bool,
    pub install_warning: bool,
    pub status: PackStatus,
    /// Why the status is what it is, for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_path: Option<PathBuf>,
    /// Provider instance the metadata came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip)]
    temp_dir: Option<TempDir>,
}

impl PackageMetadata {
    /// A bare record carrying only a name and a status.
    #[must_use]
    pub fn placeholder(name: &str, status: PackStatus) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            license: None,
            depends: Vec::new(),
            imports: Vec::new(),
            suggests: Vec::new(),
            linking_to: Vec::new(),
            license_class: LicenseClass::Unknown,
            install_allowed: true,
            install_warning: true,
            status,
            status_detail: None,
            package_path: None,
            provider: None,
            temp_dir: None,
        }
    }

    /// Placeholder for a failed operation, keeping the error text.
    #[must_use]
    pub fn failed(name: &str, error: &PkgError) -> Self {
        let mut meta = Self::placeholder(name, error.status());
        meta.status_detail = Some(error.to_string());
        meta
    }

    /// Parse metadata with the built-in license policy.
    pub fn parse(source: ManifestSource<'_>) -> Result<Self, PkgError> {
        Self::parse_with_policy(source, LicensePolicy::builtin())
    }

    /// Parse metadata from an archive, a directory or a bare name.
    ///
    /// A bare name produces a `NOT_FOUND` placeholder.
    pub fn parse_with_policy(
        source: ManifestSource<'_>,
        policy: &LicensePolicy,
    ) -> Result<Self, PkgError> {
        match source {
            ManifestSource::Name(name) => Ok(Self::placeholder(name, PackStatus::NotFound)),
            ManifestSource::Archive(path) => {
                let (name, version) = parse_filename(&path.to_string_lossy())?;
                let manifest = read_manifest_archive(path, &name)?;
                let mut meta = Self::from_manifest(&manifest, &name, Some(&version), policy);
                meta.package_path = Some(path.to_path_buf());
                Ok(meta)
            }
            ManifestSource::Directory(dir) => {
                let fallback = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let manifest = read_manifest_dir(dir)?;
                let mut meta = Self::from_manifest(&manifest, &fallback, None, policy);
                meta.package_path = Some(dir.to_path_buf());
                Ok(meta)
            }
        }
    }

    /// Build metadata from parsed manifest fields.
    #[must_use]
    pub fn from_manifest(
        manifest: &Manifest,
        fallback_name: &str,
        fallback_version: Option<&str>,
        policy: &LicensePolicy,
    ) -> Self {
        let license = manifest.license().map(String::from);
        let verdict = policy.classify(license.as_deref());
        Self {
            name: manifest.package().unwrap_or(fallback_name).to_string(),
            version: manifest
                .version()
                .or(fallback_version)
                .map(String::from),
            license,
            depends: manifest.list("depends"),
            imports: manifest.list("imports"),
            suggests: manifest.list("suggests"),
            linking_to: manifest.list("linkingto"),
            license_class: verdict.class,
            install_allowed: verdict.install_allowed,
            install_warning: verdict.install_warning,
            status: PackStatus::Parsed,
            status_detail: None,
            package_path: None,
            provider: None,
            temp_dir: None,
        }
    }

    /// Attach the temp directory holding `package_path`.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: TempDir) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    /// Record the provider instance name.
    #[must_use]
    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    /// Whether a temp directory is still held.
    #[must_use]
    pub fn holds_temp_dir(&self) -> bool {
        self.temp_dir.is_some()
    }

    /// Path of the owned temp directory, if any.
    #[must_use]
    pub fn temp_dir_path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Delete the temp directory now. A `package_path` inside it is cleared.
    pub fn release(&mut self) {
        if let Some(dir) = self.temp_dir.take() {
            if self
                .package_path
                .as_ref()
                .is_some_and(|p| p.starts_with(dir.path()))
            {
                self.package_path = None;
            }
            if let Err(e) = dir.close() {
                tracing::warn!(package = %self.name, error = %e, "failed to remove temp dir");
            }
        }
    }

    /// The metadata was parsed from a real manifest.
    #[must_use]
    pub fn is_found(&self) -> bool {
        !self.status.is_failure()
    }

    /// Names listed under `relation`.
    #[must_use]
    pub fn relation(&self, relation: Relation) -> &[String] {
        match relation {
            Relation::Depends => &self.depends,
            Relation::Imports => &self.imports,
            Relation::Suggests => &self.suggests,
            Relation::LinkingTo => &self.linking_to,
        }
    }

    /// Imports followed by depends, without base packages.
    #[must_use]
    pub fn dependencies(&self, base: &BasePackages) -> Vec<String> {
        self.imports
            .iter()
            .chain(&self.depends)
            .filter(|name| !base.contains(name))
            .cloned()
            .collect()
    }

    /// `<name>_<version>.tar.gz`, when the version is known.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.version
            .as_deref()
            .map(|version| format_filename(&self.name, version))
    }
}
