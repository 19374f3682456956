//! A live R installation.

use crate::config::REnvConfig;
use crate::pkg::base::BasePackages;
use crate::pkg::command::{run_command, CommandOutput};
use crate::pkg::description::MANIFEST_FILE;
use crate::pkg::error::PkgError;
use crate::pkg::license::LicenseClass;
use crate::pkg::metadata::{ManifestSource, PackStatus, PackageMetadata};
use crate::pkg::provider::{metadata_from_error, Provider, Selector};
use rpack_util::fs::{append_line, copy_into_dir};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Script collecting install commands in dry-run mode.
pub const INSTALL_SCRIPT: &str = "install.sh";

/// Default wall-clock bound for one install.
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Phrases betraying a failed install despite a zero exit code.
const STDERR_FAILURE_PHRASES: [&str; 3] = ["failed", "FAILED", "ERROR:"];
const HALTED: &str = "Execution halted";

/// Installed packages under an R home's library.
#[derive(Debug, Clone)]
pub struct REnvProvider {
    name: String,
    rhome: PathBuf,
    library: PathBuf,
    r_binary: PathBuf,
    licensecheck: bool,
    install_timeout: Duration,
    base: BasePackages,
}

impl REnvProvider {
    /// # Errors
    /// Returns `PKG_CONFIG_INVALID` when the R home, the library or
    /// `bin/R` is missing.
    pub fn new(name: &str, config: &REnvConfig) -> Result<Self, PkgError> {
        let missing = |path: &Path| {
            PkgError::config_invalid(format!("{} does not exist", path.display()))
        };

        if !config.rhome.is_dir() {
            return Err(missing(&config.rhome));
        }
        let library = if config.librarypath.is_absolute() {
            config.librarypath.clone()
        } else {
            config.rhome.join(&config.librarypath)
        };
        if !library.is_dir() {
            return Err(missing(&library));
        }
        let r_binary = config.rhome.join("bin").join("R");
        if !r_binary.is_file() {
            return Err(missing(&r_binary));
        }

        Ok(Self {
            name: name.to_string(),
            rhome: config.rhome.clone(),
            library,
            r_binary,
            licensecheck: config.licensecheck,
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            base: BasePackages::default(),
        })
    }

    #[must_use]
    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_base_packages(mut self, base: BasePackages) -> Self {
        self.base = base;
        self
    }

    #[must_use]
    pub fn rhome(&self) -> &Path {
        &self.rhome
    }

    /// Absolute library directory.
    #[must_use]
    pub fn library(&self) -> &Path {
        &self.library
    }

    #[must_use]
    pub fn r_binary(&self) -> &Path {
        &self.r_binary
    }

    #[must_use]
    pub fn licensecheck(&self) -> bool {
        self.licensecheck
    }

    /// Whether `package` has an installation directory.
    #[must_use]
    pub fn is_installed(&self, package: &str) -> bool {
        self.library.join(package).is_dir()
    }

    fn install_command(&self, archive: &Path) -> String {
        format!("{} CMD INSTALL {}", self.r_binary.display(), archive.display())
    }

    /// Leave an existing installation alone unless overwriting applies.
    ///
    /// `Some(status)` ends the operation early.
    fn keep_existing(
        &self,
        package: &str,
        overwrite: bool,
        overwrite_names: &[String],
    ) -> Option<PackStatus> {
        if !self.is_installed(package) {
            return None;
        }
        if !overwrite && !overwrite_names.iter().any(|n| n == package) {
            info!(provider = %self.name, package, "already installed, overwriting is disabled");
            return Some(PackStatus::Deployed);
        }
        None
    }

    /// Remove a previous installation of `package`, if any.
    fn remove_existing(&self, package: &str) -> Result<(), PackStatus> {
        let dir = self.library.join(package);
        if !dir.is_dir() {
            return Ok(());
        }
        info!(provider = %self.name, package, "removing the previous installation");
        std::fs::remove_dir_all(&dir).map_err(|e| {
            error!(provider = %self.name, package, error = %e, "failed to uninstall previous version");
            PackStatus::DeployFailed
        })
    }

    fn parse_archive(&self, archive: &Path) -> Result<PackageMetadata, PackStatus> {
        if !archive.is_file() {
            error!(provider = %self.name, path = %archive.display(), "cannot access archive");
            return Err(PackStatus::DeployFailed);
        }
        PackageMetadata::parse(ManifestSource::Archive(archive)).map_err(|e| {
            error!(provider = %self.name, path = %archive.display(), error = %e, "cannot install");
            PackStatus::Invalid
        })
    }

    /// Install an archive with `R CMD INSTALL`.
    ///
    /// # Errors
    /// Returns `PKG_INSTALL_BLOCKED` when the license forbids installation.
    pub async fn install(
        &self,
        archive: &Path,
        overwrite: bool,
        overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError> {
        let meta = match self.parse_archive(archive) {
            Ok(meta) => meta,
            Err(status) => return Ok(status),
        };
        if let Some(status) = self.keep_existing(&meta.name, overwrite, overwrite_names) {
            return Ok(status);
        }

        let license = meta.license.as_deref().unwrap_or("");
        if !meta.install_allowed {
            return Err(PkgError::install_blocked(
                &meta.name,
                license,
                meta.license_class.as_str(),
            ));
        }
        if meta.install_warning {
            warn!(
                provider = %self.name,
                package = %meta.name,
                license,
                class = meta.license_class.as_str(),
                "license needs review"
            );
        }
        if let Err(status) = self.remove_existing(&meta.name) {
            return Ok(status);
        }

        info!(provider = %self.name, command = %self.install_command(archive), "installing");
        let output = match run_command(
            &self.r_binary,
            [Path::new("CMD"), Path::new("INSTALL"), archive],
            self.install_timeout,
        )
        .await
        {
            Ok(output) => output,
            Err(e) => {
                error!(provider = %self.name, package = %meta.name, error = %e, "cannot run R");
                return Ok(PackStatus::DeployFailed);
            }
        };

        match install_failure(&output) {
            Some(reason) => {
                error!(
                    provider = %self.name,
                    package = %meta.name,
                    code = output.code,
                    reason,
                    stdout = %output.stdout,
                    stderr = %output.stderr,
                    "installation failed"
                );
                Ok(PackStatus::DeployFailed)
            }
            None => {
                info!(provider = %self.name, package = %meta.name, "installed");
                Ok(PackStatus::Deployed)
            }
        }
    }

    /// Record the install command instead of running it.
    ///
    /// The archive is copied into `script_dir` and the command appended to
    /// `script_dir/install.sh`. Existing installations are never removed.
    ///
    /// # Errors
    /// Returns `PKG_INSTALL_BLOCKED` when license checks are on and the
    /// license is blacklisted.
    pub fn install_dry_run(
        &self,
        archive: &Path,
        script_dir: &Path,
        overwrite: bool,
        overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError> {
        let meta = match self.parse_archive(archive) {
            Ok(meta) => meta,
            Err(status) => return Ok(status),
        };
        if let Some(status) = self.keep_existing(&meta.name, overwrite, overwrite_names) {
            return Ok(status);
        }

        if self.licensecheck {
            let license = meta.license.as_deref().unwrap_or("");
            match meta.license_class {
                LicenseClass::Blacklisted => {
                    return Err(PkgError::install_blocked(
                        &meta.name,
                        license,
                        meta.license_class.as_str(),
                    ))
                }
                LicenseClass::Restricted => {
                    warn!(provider = %self.name, package = %meta.name, license, "license is RESTRICTED");
                }
                _ => {}
            }
        }

        let copied = copy_into_dir(archive, script_dir)?;
        append_line(&script_dir.join(INSTALL_SCRIPT), &self.install_command(&copied))?;
        info!(provider = %self.name, package = %meta.name, "command written to install script");
        Ok(PackStatus::Deployed)
    }
}

/// Why an install run counts as failed, if it does.
///
/// R does not reliably exit non-zero, so the captured output is searched too.
#[must_use]
pub fn install_failure(output: &CommandOutput) -> Option<&'static str> {
    if output.timed_out {
        return Some("timeout");
    }
    if output.code != 0 {
        return Some("exit code");
    }
    if output.stderr.contains(HALTED) || output.stdout.contains(HALTED) {
        return Some(HALTED);
    }
    STDERR_FAILURE_PHRASES
        .into_iter()
        .find(|phrase| output.stderr.contains(phrase))
}

impl Provider for REnvProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// Installed package names, base packages excluded.
    async fn list(&self, selector: &Selector) -> Result<Vec<String>, PkgError> {
        if *selector != Selector::Any {
            return Err(PkgError::selector_invalid(&self.name, "no selector"));
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.library)? {
            let entry = entry?;
            let path = entry.path();
            if !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.base.contains(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn fetch_metadata(
        &self,
        name: &str,
        _selector: &Selector,
        _keep_temp_files: bool,
    ) -> Result<PackageMetadata, PkgError> {
        let dir = self.library.join(name);
        if !dir.join(MANIFEST_FILE).is_file() {
            return Ok(metadata_from_error(&self.name, name, &PkgError::not_found(name)));
        }
        match PackageMetadata::parse(ManifestSource::Directory(&dir)) {
            Ok(meta) => Ok(meta.with_provider(&self.name)),
            Err(e) => Ok(metadata_from_error(&self.name, name, &e)),
        }
    }

    async fn download_one(
        &self,
        _name: &str,
        _selector: &Selector,
        _dest: &Path,
    ) -> Result<PackStatus, PkgError> {
        Err(PkgError::not_implemented("Downloading from an R environment"))
    }

    /// Installs the archive; the destination selector is ignored.
    async fn publish_one(
        &self,
        path: &Path,
        _dest: &Selector,
        overwrite: bool,
        overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError> {
        self.install(path, overwrite, overwrite_names).await
    }

    async fn check_connection(&self, _max_attempts: u32) -> bool {
        self.r_binary.is_file() && self.library.is_dir()
    }
}
