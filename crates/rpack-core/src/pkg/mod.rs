//! R package management.
//!
//! Provides utilities for:
//! - Ordering R version strings and parsing `<name>_<version>.tar.gz` names
//! - Classifying license strings
//! - Parsing DESCRIPTION manifests from archives and installed folders
//! - Downloading and checking package archives
//! - Listing, fetching, downloading and publishing through providers
//!   (Artifactory, CRAN/MRAN, Bioconductor, local folders, live R installs)
//! - Resolving dependencies with a per-package action
//! - Building dependency graphs and exporting them as GML or JSON

pub mod base;
pub mod command;
pub mod description;
pub mod error;
pub mod filename;
pub mod graph;
pub mod http;
pub mod license;
pub mod metadata;
pub mod provider;
pub mod providers;
pub mod resolve;
pub mod tarball;
pub mod version;

pub use base::{BasePackages, BASE_PACKAGES};
pub use command::{run_command, CommandOutput};
pub use description::{read_manifest_archive, read_manifest_dir, Manifest, MANIFEST_FILE};
pub use error::{codes as pkg_codes, PkgError};
pub use filename::{format_filename, parse_filename, ARCHIVE_EXT};
pub use graph::{DepEdge, DepTree, DependencyGraph, GraphOptions, Unresolved};
pub use http::{build_client, Credentials, HttpOptions};
pub use license::{classify, LicenseClass, LicensePolicy, LicenseVerdict};
pub use metadata::{ManifestSource, PackStatus, PackageMetadata, Relation};
pub use provider::{BiocView, Provider, Selector};
pub use providers::{
    ArtifactoryProvider, Backend, BiocProvider, CranProvider, LocalProvider, MultiProvider,
    REnvProvider, SnapshotListing,
};
pub use resolve::{
    DepsManager, DownloadAction, DryRunAction, InstallAction, NoAction, NodeAction, PackNode,
    ResolveReport,
};
pub use tarball::{download_archive, MAX_ARCHIVE_SIZE};
pub use version::compare as compare_versions;
