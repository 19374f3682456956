//! `rpack publish` command implementation.

use super::{connect, load_repos, runtime};
use miette::{IntoDiagnostic, Result};
use rpack_core::pkg::{PackStatus, Provider, Selector};
use rpack_core::Config;
use std::path::PathBuf;

pub fn run(
    config: &Config,
    instance: &str,
    archives: &[PathBuf],
    repo: Option<String>,
    overwrite: bool,
) -> Result<()> {
    let repos = load_repos(config)?;
    let dest = repo.map_or(Selector::Any, Selector::Repo);

    let results = runtime()?.block_on(async {
        let backend = connect(&repos, instance).await?;
        Ok::<_, miette::Report>(backend.publish_many(archives, &dest, overwrite, &[]).await)
    })?;

    let mut rows = Vec::with_capacity(archives.len());
    for (path, result) in archives.iter().zip(results) {
        let (status, error) = match result {
            Ok(status) => (status, None),
            Err(e) => (e.status(), Some(e.to_string())),
        };
        rows.push((path, status, error));
    }
    let ok = rows
        .iter()
        .all(|(_, status, error)| error.is_none() && !status.is_failure());

    if config.json_logs {
        let packages: Vec<_> = rows
            .iter()
            .map(|(path, status, error)| {
                serde_json::json!({ "path": path, "status": status, "error": error })
            })
            .collect();
        let out = serde_json::json!({ "ok": ok, "packages": packages });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        for (path, status, error) in &rows {
            match error {
                Some(error) => println!("{:<16} {} ({error})", PackStatus::DeployFailed, path.display()),
                None => println!("{status:<16} {}", path.display()),
            }
        }
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
