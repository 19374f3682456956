//! Package dependency graph construction.
//!
//! Discovers packages from a provider the same way the resolver does, but
//! records nodes and typed edges instead of acting on each package. Names
//! that could not be resolved are reported alongside the graph.

use super::base::BasePackages;
use super::error::PkgError;
use super::metadata::{PackStatus, PackageMetadata, Relation};
use super::provider::{Provider, Selector};
use crate::version::SCHEMA_VERSION;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A typed dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DepEdge {
    pub from: String,
    pub to: String,
    pub relation: Relation,
}

/// A package that could not be added to the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unresolved {
    pub name: String,
    pub status: PackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Nodes keyed by package name plus typed edges between them.
#[derive(Debug, Serialize)]
pub struct DependencyGraph {
    pub schema_version: u32,
    nodes: BTreeMap<String, PackageMetadata>,
    edges: BTreeSet<DepEdge>,
    /// Names reachable from the roots whose metadata could not be fetched.
    unresolved: Vec<Unresolved>,
    /// Packages whose dependencies were not followed because of the depth limit.
    truncated: Vec<String>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            nodes: BTreeMap::new(),
            edges: BTreeSet::new(),
            unresolved: Vec::new(),
            truncated: Vec::new(),
        }
    }
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node unless one with the same name exists.
    ///
    /// Returns whether the node was added.
    pub fn add_node(&mut self, meta: PackageMetadata) -> bool {
        if self.nodes.contains_key(&meta.name) {
            return false;
        }
        self.nodes.insert(meta.name.clone(), meta);
        true
    }

    /// Insert an edge. Self-loops and duplicates are ignored.
    pub fn add_edge(&mut self, from: &str, to: &str, relation: Relation) -> bool {
        if from == to {
            return false;
        }
        self.edges.insert(DepEdge {
            from: from.to_string(),
            to: to.to_string(),
            relation,
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<&PackageMetadata> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PackageMetadata> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &DepEdge> {
        self.edges.iter()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn unresolved(&self) -> &[Unresolved] {
        &self.unresolved
    }

    #[must_use]
    pub fn truncated(&self) -> &[String] {
        &self.truncated
    }

    /// Render as GML with flattened metadata on nodes and a `relation`
    /// attribute on edges.
    #[must_use]
    pub fn to_gml(&self) -> String {
        Gml(self).to_string()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, PkgError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// GML strings are double-quoted; quotes and ampersands become entities.
fn gml_string(s: &str) -> String {
    let escaped = s.replace('&', "&amp;").replace('"', "&quot;");
    format!("\"{escaped}\"")
}

struct Gml<'a>(&'a DependencyGraph);

impl fmt::Display for Gml<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.0;
        let ids: BTreeMap<&str, usize> = graph
            .nodes
            .keys()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        writeln!(f, "graph [")?;
        writeln!(f, "  directed 1")?;
        for (name, meta) in &graph.nodes {
            writeln!(f, "  node [")?;
            writeln!(f, "    id {}", ids[name.as_str()])?;
            writeln!(f, "    label {}", gml_string(name))?;
            if let Some(version) = &meta.version {
                writeln!(f, "    version {}", gml_string(version))?;
            }
            if let Some(license) = &meta.license {
                writeln!(f, "    license {}", gml_string(license))?;
            }
            for relation in Relation::ALL {
                writeln!(
                    f,
                    "    {} {}",
                    relation.as_str(),
                    gml_string(&meta.relation(relation).join(", "))
                )?;
            }
            writeln!(f, "    license_class {}", gml_string(meta.license_class.as_str()))?;
            writeln!(f, "    install_allowed {}", u8::from(meta.install_allowed))?;
            writeln!(f, "    install_warning {}", u8::from(meta.install_warning))?;
            writeln!(f, "    status {}", meta.status.code())?;
            if let Some(provider) = &meta.provider {
                writeln!(f, "    provider {}", gml_string(provider))?;
            }
            writeln!(f, "  ]")?;
        }
        for edge in &graph.edges {
            let (Some(source), Some(target)) = (ids.get(edge.from.as_str()), ids.get(edge.to.as_str()))
            else {
                continue;
            };
            writeln!(f, "  edge [")?;
            writeln!(f, "    source {source}")?;
            writeln!(f, "    target {target}")?;
            writeln!(f, "    relation {}", gml_string(edge.relation.as_str()))?;
            writeln!(f, "  ]")?;
        }
        writeln!(f, "]")
    }
}

/// Options for graph construction.
#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub depends: bool,
    pub imports: bool,
    /// Follow Suggests (default false).
    pub suggests: bool,
    /// Follow LinkingTo (default false).
    pub linking_to: bool,
    /// Maximum traversal depth from a root (default 50).
    pub max_depth: usize,
    /// Metadata fetches in flight per wave (default 8).
    pub concurrency: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            depends: true,
            imports: true,
            suggests: false,
            linking_to: false,
            max_depth: 50,
            concurrency: 8,
        }
    }
}

impl GraphOptions {
    /// Relations followed during discovery.
    #[must_use]
    pub fn relations(&self) -> Vec<Relation> {
        Relation::ALL
            .into_iter()
            .filter(|r| match r {
                Relation::Depends => self.depends,
                Relation::Imports => self.imports,
                Relation::Suggests => self.suggests,
                Relation::LinkingTo => self.linking_to,
            })
            .collect()
    }
}

/// Builds a [`DependencyGraph`] from a provider.
pub struct DepTree<'a, P: Provider> {
    provider: &'a P,
    selector: Selector,
    base: BasePackages,
    options: GraphOptions,
    cancel: CancellationToken,
}

impl<'a, P: Provider> DepTree<'a, P> {
    #[must_use]
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            selector: Selector::Any,
            base: BasePackages::default(),
            options: GraphOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    #[must_use]
    pub fn with_base_packages(mut self, base: BasePackages) -> Self {
        self.base = base;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: GraphOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build the graph reachable from `roots`.
    ///
    /// Discovery runs breadth-first in waves; each wave fetches its new names
    /// with bounded concurrency. Each name is fetched at most once. Edges to
    /// packages that could not be resolved are dropped and the names are
    /// listed in [`DependencyGraph::unresolved`].
    ///
    /// # Errors
    /// On cancellation or a request the provider rejects outright.
    pub async fn build(&self, roots: &[String]) -> Result<DependencyGraph, PkgError> {
        let relations = self.options.relations();
        let concurrency = self.options.concurrency.max(1);
        let mut graph = DependencyGraph::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut pending: Vec<DepEdge> = Vec::new();

        let mut wave: Vec<String> = Vec::new();
        for root in roots {
            if !self.base.contains(root) && seen.insert(root.clone()) {
                wave.push(root.clone());
            }
        }

        let mut depth = 0;
        while !wave.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(PkgError::cancelled());
            }
            debug!(depth, size = wave.len(), "fetching wave");

            let fetches = stream::iter(wave.iter())
                .map(|name| self.provider.fetch_metadata(name, &self.selector, false))
                .buffered(concurrency)
                .collect::<Vec<_>>();
            let results = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(PkgError::cancelled()),
                results = fetches => results,
            };

            let mut next = Vec::new();
            for (name, result) in wave.iter().zip(results) {
                let meta = result?;
                if meta.status.is_failure() {
                    warn!(
                        provider = self.provider.name(),
                        package = %name,
                        status = %meta.status,
                        "package left out of graph"
                    );
                    graph.unresolved.push(Unresolved {
                        name: name.clone(),
                        status: meta.status,
                        detail: meta.status_detail.clone(),
                    });
                    continue;
                }

                // `repo/name` roots become nodes under the manifest name
                let name = &meta.name;
                if !seen.insert(name.clone()) && graph.contains(name) {
                    continue;
                }

                let follow = depth < self.options.max_depth;
                let mut truncated = false;
                for relation in &relations {
                    for dep in meta.relation(*relation) {
                        if self.base.contains(dep) {
                            continue;
                        }
                        pending.push(DepEdge {
                            from: name.clone(),
                            to: dep.clone(),
                            relation: *relation,
                        });
                        if !follow {
                            truncated = true;
                        } else if seen.insert(dep.clone()) {
                            next.push(dep.clone());
                        }
                    }
                }
                if truncated {
                    graph.truncated.push(name.clone());
                }
                graph.add_node(meta);
            }

            wave = next;
            depth += 1;
        }

        for edge in pending {
            if graph.contains(&edge.to) {
                graph.add_edge(&edge.from, &edge.to, edge.relation);
            }
        }
        graph.unresolved.sort_by(|a, b| a.name.cmp(&b.name));

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            unresolved = graph.unresolved.len(),
            "graph built"
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::resolve::tests::FakeProvider;

    fn meta(name: &str) -> PackageMetadata {
        let mut meta = PackageMetadata::placeholder(name, PackStatus::Parsed);
        meta.version = Some("1.0".into());
        meta
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_idempotent_insertion() {
        let mut graph = DependencyGraph::new();
        assert!(graph.add_node(meta("A")));
        assert!(graph.add_node(meta("B")));
        assert!(graph.add_edge("A", "B", Relation::Imports));

        assert!(!graph.add_node(meta("A")));
        assert!(!graph.add_edge("A", "B", Relation::Imports));
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);

        assert!(graph.add_edge("A", "B", Relation::Depends));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_self_loop_ignored() {
        let mut graph = DependencyGraph::new();
        graph.add_node(meta("A"));
        assert!(!graph.add_edge("A", "A", Relation::Imports));
        assert_eq!(graph.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_build_diamond() {
        let provider = FakeProvider::default()
            .with("A", &["B", "C"])
            .with("B", &["D", "utils"])
            .with("C", &["D"])
            .with("D", &[]);
        let graph = DepTree::new(&provider).build(&names(&["A"])).await.unwrap();

        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
        assert!(!graph.contains("utils"));
        assert_eq!(provider.calls().len(), 4);
        assert!(graph
            .edges()
            .all(|e| e.relation == Relation::Imports));
    }

    #[tokio::test]
    async fn test_unresolved_reported() {
        let provider = FakeProvider::default()
            .with("A", &["Missing", "Broken"])
            .broken("Broken", PackStatus::DownloadFailed);
        let graph = DepTree::new(&provider).build(&names(&["A"])).await.unwrap();

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        let unresolved: Vec<_> = graph.unresolved().iter().map(|u| u.name.as_str()).collect();
        assert_eq!(unresolved, vec!["Broken", "Missing"]);
        assert_eq!(graph.unresolved()[1].status, PackStatus::NotFound);
    }

    #[tokio::test]
    async fn test_cycle_and_self_reference() {
        let provider = FakeProvider::default()
            .with("A", &["B", "A"])
            .with("B", &["A"]);
        let graph = DepTree::new(&provider).build(&names(&["A", "B"])).await.unwrap();

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(provider.calls(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_repo_qualified_root_keyed_by_package_name() {
        let provider = FakeProvider::default()
            .with("A", &["B"])
            .with("B", &["A"]);
        let graph = DepTree::new(&provider)
            .build(&names(&["src/A", "B"]))
            .await
            .unwrap();

        let nodes: Vec<_> = graph.nodes().map(|m| m.name.as_str()).collect();
        assert_eq!(nodes, vec!["A", "B"]);
        assert!(!graph.contains("src/A"));
        let edges: Vec<_> = graph
            .edges()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(&("A", "B")));
        assert!(edges.contains(&("B", "A")));
        assert_eq!(graph.to_gml().matches("  edge [").count(), 2);
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let provider = FakeProvider::default()
            .with("A", &["B"])
            .with("B", &["C"])
            .with("C", &[]);
        let options = GraphOptions {
            max_depth: 1,
            ..GraphOptions::default()
        };
        let graph = DepTree::new(&provider)
            .with_options(options)
            .build(&names(&["A"]))
            .await
            .unwrap();

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.truncated(), &["B".to_string()]);
        assert!(!graph.contains("C"));
    }

    #[test]
    fn test_relation_filter() {
        let defaults = GraphOptions::default().relations();
        assert_eq!(defaults, vec![Relation::Depends, Relation::Imports]);

        let all = GraphOptions {
            suggests: true,
            linking_to: true,
            ..GraphOptions::default()
        };
        assert_eq!(all.relations().len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let provider = FakeProvider::default().with("A", &[]);
        let token = CancellationToken::new();
        token.cancel();
        let err = DepTree::new(&provider)
            .with_cancellation(token)
            .build(&names(&["A"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_CANCELLED);
    }

    #[test]
    fn test_gml_output() {
        let mut a = meta("A");
        a.license = Some("GPL \"2\" & MIT".into());
        a.imports = vec!["B".into()];
        let mut graph = DependencyGraph::new();
        graph.add_node(a);
        graph.add_node(meta("B"));
        graph.add_edge("A", "B", Relation::Imports);

        let gml = graph.to_gml();
        assert!(gml.starts_with("graph [\n  directed 1\n"));
        assert!(gml.contains("    label \"A\"\n"));
        assert!(gml.contains("license \"GPL &quot;2&quot; &amp; MIT\""));
        assert!(gml.contains("    imports \"B\"\n"));
        assert!(gml.contains("    source 0\n    target 1\n    relation \"imports\"\n"));
        assert!(gml.ends_with("]\n"));
    }

    #[test]
    fn test_json_output() {
        let mut graph = DependencyGraph::new();
        graph.add_node(meta("A"));
        graph.add_node(meta("B"));
        graph.add_edge("A", "B", Relation::Depends);

        let value: serde_json::Value = serde_json::from_str(&graph.to_json().unwrap()).unwrap();
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
        assert_eq!(value["nodes"]["A"]["version"], "1.0");
        assert_eq!(value["edges"][0]["relation"], "depends");
        assert_eq!(value["nodes"]["B"]["status"], "PARSED");
    }
}
