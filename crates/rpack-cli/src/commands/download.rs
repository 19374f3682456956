//! `rpack download` command implementation.

use super::{cancel_on_ctrl_c, connect, load_repos, print_report, runtime, SelectorArgs};
use miette::{IntoDiagnostic, Result};
use rpack_core::pkg::{DepsManager, DownloadAction, PackStatus, Provider};
use rpack_core::Config;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DownloadArgs {
    pub instance: String,
    pub dest: PathBuf,
    pub packages: Vec<String>,
    pub concurrency: Option<usize>,
    pub deps: bool,
    pub selector: SelectorArgs,
}

#[derive(Serialize)]
struct DownloadEntry<'a> {
    name: &'a str,
    status: PackStatus,
}

#[derive(Serialize)]
struct DownloadResult<'a> {
    ok: bool,
    dest: &'a PathBuf,
    packages: Vec<DownloadEntry<'a>>,
}

pub fn run(config: &Config, args: &DownloadArgs) -> Result<()> {
    let repos = load_repos(config)?;
    let selector = args.selector.to_selector()?;
    std::fs::create_dir_all(&args.dest).into_diagnostic()?;

    if args.deps {
        let report = runtime()?.block_on(async {
            let backend = connect(&repos, &args.instance).await?;
            let action = DownloadAction {
                dest: args.dest.clone(),
            };
            DepsManager::new(&backend)
                .with_selector(selector.clone())
                .with_cancellation(cancel_on_ctrl_c())
                .process_all(&args.packages, &action)
                .await
                .into_diagnostic()
        })?;
        print_report(&report, config.json_logs)?;
        if !report.is_success() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let concurrency = args
        .concurrency
        .map_or_else(|| repos.settings.download_concurrency(), |n| n.clamp(1, 50));
    let statuses = runtime()?.block_on(async {
        let backend = connect(&repos, &args.instance).await?;
        Ok::<_, miette::Report>(
            backend
                .download_many(&args.packages, &selector, &args.dest, concurrency)
                .await,
        )
    })?;

    let entries: Vec<DownloadEntry<'_>> = args
        .packages
        .iter()
        .zip(&statuses)
        .map(|(name, status)| DownloadEntry {
            name,
            status: *status,
        })
        .collect();
    let ok = entries.iter().all(|e| !e.status.is_failure());

    if config.json_logs {
        let result = DownloadResult {
            ok,
            dest: &args.dest,
            packages: entries,
        };
        println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
    } else {
        for entry in &entries {
            println!("{:<16} {}", entry.status, entry.name);
        }
        let failed = entries.iter().filter(|e| e.status.is_failure()).count();
        println!();
        println!("downloaded: {}  failed: {failed}", entries.len() - failed);
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
