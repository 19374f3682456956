//! `rpack scan` command implementation.

use super::{connect, load_repos, package_names, runtime, SelectorArgs};
use futures::stream::{self, StreamExt};
use miette::{IntoDiagnostic, Result};
use rpack_core::pkg::{PackageMetadata, Provider, Selector};
use rpack_core::Config;
use rpack_util::fs::atomic_write;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ScanArgs {
    pub instances: Vec<String>,
    pub out: Option<PathBuf>,
    pub selector: SelectorArgs,
}

/// One CSV record per package and instance.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ScanRow {
    pub instance: String,
    pub name: String,
    pub version: String,
    pub license: String,
    pub license_class: String,
    pub depends: String,
    pub imports: String,
    pub suggests: String,
    pub install_allowed: bool,
    pub install_warning: bool,
    pub status: String,
}

impl ScanRow {
    pub fn new(instance: &str, meta: &PackageMetadata) -> Self {
        Self {
            instance: instance.to_string(),
            name: meta.name.clone(),
            version: meta.version.clone().unwrap_or_default(),
            license: meta.license.clone().unwrap_or_default(),
            license_class: meta.license_class.as_str().to_string(),
            depends: meta.depends.join(", "),
            imports: meta.imports.join(", "),
            suggests: meta.suggests.join(", "),
            install_allowed: meta.install_allowed,
            install_warning: meta.install_warning,
            status: meta.status.to_string(),
        }
    }
}

/// Render rows as CSV with a header line.
pub fn to_csv(rows: &[ScanRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).into_diagnostic()?;
    }
    writer
        .into_inner()
        .map_err(|e| miette::miette!("cannot flush CSV output: {}", e.error()))
}

async fn scan_instance<P: Provider>(
    provider: &P,
    instance: &str,
    selector: &Selector,
    concurrency: usize,
) -> Result<Vec<ScanRow>> {
    let entries = provider.list(selector).await.into_diagnostic()?;
    let names = package_names(&entries);
    info!(instance, packages = names.len(), "scanning");

    let metas: Vec<PackageMetadata> = stream::iter(&names)
        .map(|name| async move {
            match provider.fetch_metadata(name, selector, false).await {
                Ok(meta) => meta,
                Err(e) => PackageMetadata::failed(name, &e),
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    Ok(metas
        .iter()
        .inspect(|meta| {
            if meta.status.is_failure() {
                warn!(instance, package = %meta.name, status = %meta.status, "metadata unavailable");
            }
        })
        .map(|meta| ScanRow::new(instance, meta))
        .collect())
}

pub fn run(config: &Config, args: &ScanArgs) -> Result<()> {
    let repos = load_repos(config)?;
    let selector = args.selector.to_selector()?;
    let concurrency = repos.settings.download_concurrency();

    let rows = runtime()?.block_on(async {
        let mut rows = Vec::new();
        for instance in &args.instances {
            let backend = connect(&repos, instance).await?;
            rows.extend(scan_instance(&backend, instance, &selector, concurrency).await?);
        }
        Ok::<_, miette::Report>(rows)
    })?;

    let csv = to_csv(&rows)?;
    match &args.out {
        Some(path) => {
            atomic_write(path, &csv).into_diagnostic()?;
            eprintln!("wrote {} packages to {}", rows.len(), path.display());
        }
        None => print!("{}", String::from_utf8_lossy(&csv)),
    }
    Ok(())
}
