//! Public mirrors: MRAN snapshot and Bioconductor release listings, and
//! bulk copies of either into a repository we host.

use super::{connect, load_repos, package_names, runtime, SelectorArgs};
use miette::{IntoDiagnostic, Result};
use rpack_core::config::{BIOC_INSTANCE, CRAN_INSTANCE};
use rpack_core::pkg::filename::{basename, is_archive_name, parse_filename};
use rpack_core::pkg::{Backend, BiocView, PackStatus, Provider, Selector};
use rpack_core::Config;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn snapshots(config: &Config, r_version: Option<&str>) -> Result<()> {
    let repos = load_repos(config)?;
    let listing = runtime()?.block_on(async {
        let backend = connect(&repos, CRAN_INSTANCE).await?;
        let Some(cran) = backend.as_cran() else {
            return Err(miette::miette!("'{CRAN_INSTANCE}' is not a CRAN instance"));
        };
        cran.list_snapshots(r_version).await.into_diagnostic()
    })?;

    if config.json_logs {
        println!("{}", serde_json::to_string_pretty(&listing).into_diagnostic()?);
        return Ok(());
    }

    for (version, dates) in &listing.versions {
        let first = dates.first().map_or("", String::as_str);
        let last = dates.last().map_or("", String::as_str);
        println!("R {version:<8} {:>5} snapshots  {first} .. {last}", dates.len());
    }
    eprintln!(
        "banners: {} ok, {} skipped, {} errors",
        listing.ok, listing.skipped, listing.errors
    );
    Ok(())
}

pub fn bioc_releases(config: &Config) -> Result<()> {
    let repos = load_repos(config)?;
    let releases = runtime()?.block_on(async {
        let backend = connect(&repos, BIOC_INSTANCE).await?;
        let Some(bioc) = backend.as_bioc() else {
            return Err(miette::miette!("'{BIOC_INSTANCE}' is not a Bioconductor instance"));
        };
        bioc.list_releases().await.into_diagnostic()
    })?;

    if config.json_logs {
        let out = serde_json::json!({ "releases": releases });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        for release in &releases {
            println!("{release}");
        }
    }
    Ok(())
}

/// Addressing flags for the mirror source; `--repo` names the destination.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Repo folder of an Artifactory or local source
    #[arg(long, conflicts_with_all = ["snapshot", "release"])]
    pub from_repo: Option<String>,

    /// MRAN snapshot date (default: the newest)
    #[arg(long, conflicts_with = "release")]
    pub snapshot: Option<String>,

    /// Bioconductor release (default: the newest)
    #[arg(long)]
    pub release: Option<String>,

    /// Bioconductor view: software, experimentData or annotationData
    #[arg(long, requires = "release")]
    pub view: Option<String>,
}

impl SourceArgs {
    pub fn to_selector(&self) -> Result<Selector> {
        SelectorArgs {
            repo: self.from_repo.clone(),
            snapshot: self.snapshot.clone(),
            release: self.release.clone(),
            view: self.view.clone(),
        }
        .to_selector()
    }
}

#[derive(Debug, Clone)]
pub struct MirrorArgs {
    pub from: String,
    pub to: String,
    pub packages: Vec<String>,
    pub repo: Option<String>,
    pub overwrite: bool,
    pub concurrency: Option<usize>,
    pub source: SourceArgs,
}

#[derive(Debug, Serialize)]
struct MirrorEntry {
    name: String,
    download: PackStatus,
    publish: Option<PackStatus>,
    error: Option<String>,
}

impl MirrorEntry {
    fn is_failure(&self) -> bool {
        self.download.is_failure()
            || self.error.is_some()
            || self.publish.map_or(true, PackStatus::is_failure)
    }
}

/// Pin an open selector to the newest snapshot or release.
async fn pin_selector(backend: &Backend, selector: Selector) -> Result<Selector> {
    if !matches!(selector, Selector::Any) {
        return Ok(selector);
    }
    if let Some(cran) = backend.as_cran() {
        let date = cran.latest_snapshot().await.into_diagnostic()?;
        return Ok(Selector::Snapshot(date));
    }
    if let Some(bioc) = backend.as_bioc() {
        let release = bioc.latest_release().await.into_diagnostic()?;
        return Ok(Selector::Bioc {
            release,
            view: BiocView::default(),
        });
    }
    Ok(selector)
}

/// Archives downloaded into `dir`, keyed by package name.
fn staged_archives(dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut archives = BTreeMap::new();
    for entry in std::fs::read_dir(dir).into_diagnostic()? {
        let path = entry.into_diagnostic()?.path();
        let file = path.to_string_lossy().into_owned();
        let file = basename(&file);
        if !is_archive_name(file) {
            continue;
        }
        if let Ok((name, _)) = parse_filename(file) {
            archives.insert(name, path);
        }
    }
    Ok(archives)
}

pub fn mirror(config: &Config, args: &MirrorArgs) -> Result<()> {
    let repos = load_repos(config)?;
    let selector = args.source.to_selector()?;
    let dest = args.repo.clone().map_or(Selector::Any, Selector::Repo);
    let concurrency = args
        .concurrency
        .map_or_else(|| repos.settings.download_concurrency(), |n| n.clamp(1, 50));
    let staging = tempfile::Builder::new()
        .prefix("rpack-mirror-")
        .tempdir()
        .into_diagnostic()?;

    let entries = runtime()?.block_on(async {
        let source = connect(&repos, &args.from).await?;
        let target = connect(&repos, &args.to).await?;
        let selector = pin_selector(&source, selector).await?;

        let names = if args.packages.is_empty() {
            package_names(&source.list(&selector).await.into_diagnostic()?)
        } else {
            args.packages.clone()
        };
        info!(from = %args.from, to = %args.to, packages = names.len(), ?selector, "mirroring");

        let downloads = source
            .download_many(&names, &selector, staging.path(), concurrency)
            .await;
        let archives = staged_archives(staging.path())?;
        let paths: Vec<PathBuf> = archives.values().cloned().collect();
        let published = target.publish_many(&paths, &dest, args.overwrite, &[]).await;
        let mut results: BTreeMap<&str, _> = archives
            .keys()
            .map(String::as_str)
            .zip(published)
            .collect();

        let entries: Vec<MirrorEntry> = names
            .iter()
            .zip(downloads)
            .map(|(name, download)| {
                let (publish, error) = match results.remove(name.as_str()) {
                    Some(Ok(status)) => (Some(status), None),
                    Some(Err(e)) => (Some(e.status()), Some(e.to_string())),
                    None => (None, None),
                };
                MirrorEntry {
                    name: name.clone(),
                    download,
                    publish,
                    error,
                }
            })
            .collect();
        Ok::<_, miette::Report>(entries)
    })?;
    drop(staging);

    let ok = entries.iter().all(|e| !e.is_failure());
    if config.json_logs {
        let out = serde_json::json!({
            "ok": ok,
            "from": args.from,
            "to": args.to,
            "packages": entries,
        });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        for entry in &entries {
            let publish = entry.publish.map_or_else(|| "-".to_string(), |s| s.to_string());
            match &entry.error {
                Some(error) => println!("{:<16} {publish:<16} {} ({error})", entry.download, entry.name),
                None => println!("{:<16} {publish:<16} {}", entry.download, entry.name),
            }
        }
        let failed = entries.iter().filter(|e| e.is_failure()).count();
        println!();
        println!("mirrored: {}  failed: {failed}", entries.len() - failed);
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
