pub mod clone;
pub mod config_check;
pub mod download;
pub mod graph;
pub mod mirrors;
pub mod publish;
pub mod query;
pub mod scan;
pub mod version;

use miette::{IntoDiagnostic, Result};
use rpack_core::config::ReposConfig;
use rpack_core::pkg::filename::{basename, is_archive_name, parse_filename};
use rpack_core::pkg::{Backend, BiocView, Provider, ResolveReport, Selector};
use rpack_core::Config;
use std::collections::BTreeSet;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// Addressing flags shared by commands that read from a repository.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SelectorArgs {
    /// Repo folder of an Artifactory or local instance
    #[arg(long, conflicts_with_all = ["snapshot", "release"])]
    pub repo: Option<String>,

    /// MRAN snapshot date (YYYY-MM-DD)
    #[arg(long, conflicts_with = "release")]
    pub snapshot: Option<String>,

    /// Bioconductor release, e.g. 3.18
    #[arg(long)]
    pub release: Option<String>,

    /// Bioconductor view: software, experimentData or annotationData
    #[arg(long, requires = "release")]
    pub view: Option<String>,
}

impl SelectorArgs {
    pub fn to_selector(&self) -> Result<Selector> {
        if let Some(repo) = &self.repo {
            return Ok(Selector::Repo(repo.clone()));
        }
        if let Some(date) = &self.snapshot {
            return Ok(Selector::Snapshot(date.clone()));
        }
        if let Some(release) = &self.release {
            let view = match &self.view {
                Some(view) => view.parse::<BiocView>().into_diagnostic()?,
                None => BiocView::default(),
            };
            return Ok(Selector::Bioc {
                release: release.clone(),
                view,
            });
        }
        Ok(Selector::Any)
    }
}

pub fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()
}

pub fn load_repos(config: &Config) -> Result<ReposConfig> {
    config.load_repos().into_diagnostic()
}

/// Build the named instance and make sure it answers.
pub async fn connect(repos: &ReposConfig, name: &str) -> Result<Backend> {
    let backend = Backend::from_config(repos, name).into_diagnostic()?;
    if !backend
        .check_connection(repos.settings.connection_attempts)
        .await
    {
        return Err(miette::miette!("cannot reach repository instance '{name}'"));
    }
    Ok(backend)
}

/// Token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping");
            child.cancel();
        }
    });
    token
}

/// Package names behind listing entries, deduplicated in listing order.
///
/// Archive entries (`repo/name_1.0.tar.gz`) map to their package name; bare
/// names are kept as they are.
pub fn package_names(entries: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for entry in entries {
        let file = basename(entry);
        let name = if is_archive_name(file) {
            match parse_filename(file) {
                Ok((name, _)) => name,
                Err(_) => continue,
            }
        } else {
            entry.clone()
        };
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

/// Roots given on the command line, or everything the provider lists.
pub async fn roots_or_all<P: Provider>(
    provider: &P,
    packages: &[String],
    selector: &Selector,
) -> Result<Vec<String>> {
    if !packages.is_empty() {
        return Ok(packages.to_vec());
    }
    let entries = provider.list(selector).await.into_diagnostic()?;
    Ok(package_names(&entries))
}

pub fn print_report(report: &ResolveReport, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "ok": report.is_success(),
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
        return Ok(());
    }

    for node in &report.processed {
        println!(
            "{:<16} {} {}",
            node.status,
            node.name,
            node.version.as_deref().unwrap_or("")
        );
    }
    println!();
    println!(
        "processed: {}  not found: {}  download failed: {}  action failed: {}",
        report.processed.len(),
        report.not_found.len(),
        report.download_failed.len(),
        report.action_failed.len()
    );
    if !report.not_found.is_empty() {
        println!("not found: {}", report.not_found.join(", "));
    }
    if !report.download_failed.is_empty() {
        println!("download failed: {}", report.download_failed.join(", "));
    }
    for (name, reason) in &report.action_failed {
        println!("failed: {name}: {reason}");
    }
    Ok(())
}
