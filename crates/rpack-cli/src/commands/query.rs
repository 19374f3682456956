//! `rpack query` command implementation.

use super::{connect, load_repos, runtime, SelectorArgs};
use miette::{IntoDiagnostic, Result};
use rpack_core::pkg::Provider;
use rpack_core::Config;

pub fn run(config: &Config, instance: &str, pattern: &str, selector: &SelectorArgs) -> Result<()> {
    let repos = load_repos(config)?;
    let selector = selector.to_selector()?;

    let matches = runtime()?.block_on(async {
        let backend = connect(&repos, instance).await?;
        backend.find(pattern, &selector).await.into_diagnostic()
    })?;

    if config.json_logs {
        let out = serde_json::json!({ "instance": instance, "matches": matches });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        for entry in &matches {
            println!("{entry}");
        }
    }
    Ok(())
}
