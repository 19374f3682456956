//! `rpack config-check` command implementation.

use super::{load_repos, runtime};
use miette::{IntoDiagnostic, Result};
use rpack_core::config::InstanceKind;
use rpack_core::pkg::{Backend, Provider};
use rpack_core::Config;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct InstanceCheck {
    name: String,
    kind: InstanceKind,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(config: &Config) -> Result<()> {
    let repos = load_repos(config)?;
    let attempts = repos.settings.connection_attempts;

    let checks = runtime()?.block_on(async {
        let mut checks = Vec::new();
        for (name, kind) in repos.instances() {
            let check = match Backend::from_config(&repos, &name) {
                Ok(backend) => {
                    let ok = backend.check_connection(attempts).await;
                    InstanceCheck {
                        name,
                        kind,
                        ok,
                        error: (!ok).then(|| "not reachable".to_string()),
                    }
                }
                Err(e) => InstanceCheck {
                    name,
                    kind,
                    ok: false,
                    error: Some(e.to_string()),
                },
            };
            checks.push(check);
        }
        checks
    });

    let ok = checks.iter().all(|c| c.ok);
    if config.json_logs {
        let out = serde_json::json!({ "ok": ok, "instances": checks });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        for check in &checks {
            let mark = if check.ok { "ok" } else { "FAIL" };
            match &check.error {
                Some(error) => println!("{mark:<5} {:<20} {:<13} {error}", check.name, check.kind.as_str()),
                None => println!("{mark:<5} {:<20} {}", check.name, check.kind.as_str()),
            }
        }
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
