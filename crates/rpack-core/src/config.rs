use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable pointing at the repositories config file.
pub const CONFIG_ENV: &str = "RPACK_CONFIG";

/// File name looked up under the user config directory.
pub const CONFIG_FILE_NAME: &str = "repos.json";

/// Name of the built-in CRAN/MRAN instance.
pub const CRAN_INSTANCE: &str = "cran";

/// Name of the built-in Bioconductor instance.
pub const BIOC_INSTANCE: &str = "bioc";

/// Runtime configuration for the rpack CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Explicit repositories config path (`--config`).
    pub repos_config: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            repos_config: None,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set an explicit repositories config path.
    #[must_use]
    pub fn with_repos_config(mut self, path: Option<PathBuf>) -> Self {
        self.repos_config = path.map(|p| {
            if p.is_absolute() {
                p
            } else {
                self.cwd.join(p)
            }
        });
        self
    }

    /// Load the repositories config this runtime config points at.
    pub fn load_repos(&self) -> Result<ReposConfig, Error> {
        ReposConfig::discover(self.repos_config.as_deref())
    }
}

/// A remote binary-repository manager (Artifactory) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactoryConfig {
    /// Base URL, e.g. `https://host/artifactory`.
    pub baseurl: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Verify TLS certificates.
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Extra PEM bundle to trust.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Repository folders, searched in this order.
    pub repos: Vec<String>,
}

/// A local filesystem repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRepoConfig {
    pub baseurl: PathBuf,
    pub repos: Vec<String>,
}

/// A live R installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct REnvConfig {
    pub rhome: PathBuf,
    /// Absolute, or relative to `rhome` (e.g. `lib64/R/library`).
    pub librarypath: PathBuf,
    #[serde(default)]
    pub licensecheck: bool,
}

/// Override for one of the public mirrors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub baseurl: Option<String>,
}

/// Tuning knobs shared by every instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Parallel archive downloads (clamped to 1..=50).
    pub download_concurrency: usize,
    /// Parallel index/detail page scrapes.
    pub scrape_concurrency: usize,
    /// Wall-clock bound for one `R CMD INSTALL`.
    pub install_timeout_secs: u64,
    /// Attempts made by connectivity checks.
    pub connection_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_concurrency: 8,
            scrape_concurrency: 16,
            install_timeout_secs: 600,
            connection_attempts: 3,
        }
    }
}

impl Settings {
    /// Download concurrency clamped to a sane bound.
    #[must_use]
    pub fn download_concurrency(&self) -> usize {
        self.download_concurrency.clamp(1, 50)
    }

    /// Scrape concurrency clamped to a sane bound.
    #[must_use]
    pub fn scrape_concurrency(&self) -> usize {
        self.scrape_concurrency.clamp(1, 50)
    }
}

/// Kind of a configured repository instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Artifactory,
    Local,
    REnvironment,
    Cran,
    Bioconductor,
}

impl InstanceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Artifactory => "artifactory",
            Self::Local => "local",
            Self::REnvironment => "renvironment",
            Self::Cran => "cran",
            Self::Bioconductor => "bioconductor",
        }
    }
}

/// The repositories config document.
///
/// ```json
/// {
///   "artifactory": { "arti": { "baseurl": "https://host/artifactory", "repos": ["R-3.1.2"] } },
///   "local": { "mirror": { "baseurl": "/srv/rpacks", "repos": ["cran", "bioc"] } },
///   "renvironment": { "R-3.4": { "rhome": "/opt/R-3.4", "librarypath": "lib64/R/library" } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReposConfig {
    #[serde(default)]
    pub artifactory: BTreeMap<String, ArtifactoryConfig>,
    #[serde(default)]
    pub local: BTreeMap<String, LocalRepoConfig>,
    #[serde(default)]
    pub renvironment: BTreeMap<String, REnvConfig>,
    #[serde(default)]
    pub cran: MirrorConfig,
    #[serde(default)]
    pub bioc: MirrorConfig,
    #[serde(default)]
    pub settings: Settings,
}

fn default_true() -> bool {
    true
}

impl ReposConfig {
    /// Parse and validate a config document.
    pub fn from_json(path: &Path, text: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(path, &text)
    }

    /// Locate the config file: explicit path, then `$RPACK_CONFIG`,
    /// then `<config dir>/rpack/repos.json`.
    #[must_use]
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs_next::config_dir().map(|dir| dir.join("rpack").join(CONFIG_FILE_NAME))
    }

    /// Load the config from the located path.
    ///
    /// A missing default file yields a config with only the public mirrors;
    /// a missing explicit or `$RPACK_CONFIG` file is an error.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, Error> {
        let from_env = explicit.is_none()
            && std::env::var(CONFIG_ENV).is_ok_and(|p| !p.is_empty());
        match Self::locate(explicit) {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) if explicit.is_some() || from_env => Err(Error::ConfigRead {
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                path,
            }),
            _ => Ok(Self::default()),
        }
    }

    /// Reject documents that would make instance lookup ambiguous.
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = BTreeSet::new();
        let names = self
            .artifactory
            .keys()
            .chain(self.local.keys())
            .chain(self.renvironment.keys());
        for name in names {
            if name == CRAN_INSTANCE || name == BIOC_INSTANCE {
                return Err(Error::config_invalid(format!(
                    "instance name '{name}' is reserved"
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::config_invalid(format!(
                    "instance '{name}' is defined more than once"
                )));
            }
        }

        for (name, arti) in &self.artifactory {
            if arti.repos.is_empty() {
                return Err(Error::config_invalid(format!(
                    "artifactory instance '{name}' has no repos"
                )));
            }
            if arti.user.is_some() != arti.password.is_some() {
                return Err(Error::config_invalid(format!(
                    "artifactory instance '{name}' needs both user and password"
                )));
            }
        }

        for (name, local) in &self.local {
            if local.repos.is_empty() {
                return Err(Error::config_invalid(format!(
                    "local instance '{name}' has no repos"
                )));
            }
        }

        Ok(())
    }

    /// Kind of the instance called `name`.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<InstanceKind> {
        if name == CRAN_INSTANCE {
            Some(InstanceKind::Cran)
        } else if name == BIOC_INSTANCE {
            Some(InstanceKind::Bioconductor)
        } else if self.artifactory.contains_key(name) {
            Some(InstanceKind::Artifactory)
        } else if self.local.contains_key(name) {
            Some(InstanceKind::Local)
        } else if self.renvironment.contains_key(name) {
            Some(InstanceKind::REnvironment)
        } else {
            None
        }
    }

    /// All instance names with their kinds, sorted by name.
    #[must_use]
    pub fn instances(&self) -> Vec<(String, InstanceKind)> {
        let mut all: Vec<(String, InstanceKind)> = vec![
            (CRAN_INSTANCE.to_string(), InstanceKind::Cran),
            (BIOC_INSTANCE.to_string(), InstanceKind::Bioconductor),
        ];
        all.extend(
            self.artifactory
                .keys()
                .map(|n| (n.clone(), InstanceKind::Artifactory)),
        );
        all.extend(self.local.keys().map(|n| (n.clone(), InstanceKind::Local)));
        all.extend(
            self.renvironment
                .keys()
                .map(|n| (n.clone(), InstanceKind::REnvironment)),
        );
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Error for an instance name nobody configured.
    #[must_use]
    pub fn unknown_instance(&self, name: &str) -> Error {
        let known: Vec<String> = self.instances().into_iter().map(|(n, _)| n).collect();
        Error::UnknownInstance {
            name: name.to_string(),
            known: known.join(", "),
        }
    }
}
