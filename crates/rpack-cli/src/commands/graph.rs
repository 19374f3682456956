//! `rpack graph` command implementation.

use super::{cancel_on_ctrl_c, connect, load_repos, roots_or_all, runtime, SelectorArgs};
use miette::{IntoDiagnostic, Result};
use rpack_core::pkg::{DepTree, DependencyGraph, GraphOptions, MultiProvider, Provider, Selector};
use rpack_core::Config;
use rpack_util::fs::atomic_write;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Gml,
    Json,
}

impl GraphFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "gml" => Ok(Self::Gml),
            "json" => Ok(Self::Json),
            other => Err(miette::miette!(
                "unknown graph format '{other}' (expected gml or json)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphArgs {
    pub instance: String,
    /// Instances searched, in order, for dependencies the first one lacks.
    pub fallback: Vec<String>,
    pub packages: Vec<String>,
    pub suggests: bool,
    pub linkingto: bool,
    pub max_depth: usize,
    pub out: Option<PathBuf>,
    pub format: GraphFormat,
    pub selector: SelectorArgs,
}

pub fn run(config: &Config, args: &GraphArgs) -> Result<()> {
    let repos = load_repos(config)?;
    let selector = args.selector.to_selector()?;

    let graph = runtime()?.block_on(async {
        let backend = connect(&repos, &args.instance).await?;
        let roots = roots_or_all(&backend, &args.packages, &selector).await?;
        // Selector flags address the primary instance only
        let mut members = vec![(backend, selector.clone())];
        for name in &args.fallback {
            members.push((connect(&repos, name).await?, Selector::Any));
        }
        let search = MultiProvider::with_selectors(members);
        info!(roots = roots.len(), provider = search.name(), "building graph");

        let options = GraphOptions {
            suggests: args.suggests,
            linking_to: args.linkingto,
            max_depth: args.max_depth,
            concurrency: repos.settings.download_concurrency(),
            ..GraphOptions::default()
        };
        DepTree::new(&search)
            .with_selector(selector.clone())
            .with_options(options)
            .with_cancellation(cancel_on_ctrl_c())
            .build(&roots)
            .await
            .into_diagnostic()
    })?;

    let text = render(&graph, args.format)?;
    match &args.out {
        Some(path) => {
            atomic_write(path, text.as_bytes()).into_diagnostic()?;
            eprintln!(
                "wrote {} nodes and {} edges to {}",
                graph.node_count(),
                graph.edge_count(),
                path.display()
            );
        }
        None => print!("{text}"),
    }

    for unresolved in graph.unresolved() {
        eprintln!("unresolved: {} ({})", unresolved.name, unresolved.status);
    }
    if !graph.unresolved().is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn render(graph: &DependencyGraph, format: GraphFormat) -> Result<String> {
    match format {
        GraphFormat::Gml => Ok(graph.to_gml()),
        GraphFormat::Json => {
            let mut text = graph.to_json().into_diagnostic()?;
            text.push('\n');
            Ok(text)
        }
    }
}
