//! `rpack clone` command implementation.
//!
//! Resolves packages from one instance and installs them, dependencies
//! first, into a live R environment (or writes an install script).

use super::{cancel_on_ctrl_c, connect, load_repos, print_report, roots_or_all, runtime, SelectorArgs};
use miette::{IntoDiagnostic, Result};
use rpack_core::pkg::{DepsManager, DryRunAction, InstallAction};
use rpack_core::Config;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CloneArgs {
    pub from: String,
    pub to: String,
    pub packages: Vec<String>,
    pub overwrite: bool,
    pub overwrite_only: Vec<String>,
    pub dry_run: Option<PathBuf>,
    pub selector: SelectorArgs,
}

pub fn run(config: &Config, args: &CloneArgs) -> Result<()> {
    let repos = load_repos(config)?;
    let selector = args.selector.to_selector()?;
    if let Some(dir) = &args.dry_run {
        std::fs::create_dir_all(dir).into_diagnostic()?;
    }

    let report = runtime()?.block_on(async {
        let target = connect(&repos, &args.to).await?;
        let Some(renv) = target.as_renv() else {
            return Err(miette::miette!(
                "'{}' is a {} instance, clone needs an R environment",
                args.to,
                target.kind().as_str()
            ));
        };
        let source = connect(&repos, &args.from).await?;
        let roots = roots_or_all(&source, &args.packages, &selector).await?;
        info!(roots = roots.len(), "cloning");

        let mut manager = DepsManager::new(&source)
            .with_selector(selector.clone())
            .with_cancellation(cancel_on_ctrl_c());
        let report = match &args.dry_run {
            Some(dir) => {
                let action = DryRunAction {
                    renv,
                    script_dir: dir.clone(),
                    overwrite: args.overwrite,
                    overwrite_names: args.overwrite_only.clone(),
                };
                manager.process_all(&roots, &action).await
            }
            None => {
                let action = InstallAction {
                    renv,
                    overwrite: args.overwrite,
                    overwrite_names: args.overwrite_only.clone(),
                };
                manager.process_all(&roots, &action).await
            }
        };
        report.into_diagnostic()
    })?;

    print_report(&report, config.json_logs)?;
    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
