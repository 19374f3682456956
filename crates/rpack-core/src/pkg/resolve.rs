//! Dependency resolution with per-node actions.
//!
//! Starting from root package names, the resolver fetches metadata, walks
//! imports and depends, and runs an action on each package after all of its
//! dependencies were handled (post-order). Work is memoized by name so each
//! package is fetched at most once per resolver, and failures are recorded
//! rather than propagated.

use super::base::BasePackages;
use super::error::PkgError;
use super::metadata::{PackStatus, PackageMetadata};
use super::provider::{Provider, Selector};
use super::providers::REnvProvider;
use rpack_util::fs::copy_into_dir;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Work applied to each resolved package.
#[allow(async_fn_in_trait)]
pub trait NodeAction {
    /// Whether fetched archives must stay on disk until the action ran.
    fn needs_archive(&self) -> bool {
        true
    }

    /// Act on a package whose dependencies were already handled.
    async fn apply(&self, node: &PackageMetadata) -> Result<PackStatus, PkgError>;
}

/// Discovery only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAction;

impl NodeAction for NoAction {
    fn needs_archive(&self) -> bool {
        false
    }

    async fn apply(&self, node: &PackageMetadata) -> Result<PackStatus, PkgError> {
        Ok(node.status)
    }
}

/// Copy each package archive into a folder.
#[derive(Debug, Clone)]
pub struct DownloadAction {
    pub dest: PathBuf,
}

impl NodeAction for DownloadAction {
    async fn apply(&self, node: &PackageMetadata) -> Result<PackStatus, PkgError> {
        let path = node
            .package_path
            .as_deref()
            .ok_or_else(|| PkgError::download_failed(format!("No archive for {}", node.name)))?;
        copy_into_dir(path, &self.dest)?;
        Ok(PackStatus::Downloaded)
    }
}

/// Install each package into a live R environment.
#[derive(Debug, Clone)]
pub struct InstallAction<'a> {
    pub renv: &'a REnvProvider,
    pub overwrite: bool,
    pub overwrite_names: Vec<String>,
}

impl NodeAction for InstallAction<'_> {
    async fn apply(&self, node: &PackageMetadata) -> Result<PackStatus, PkgError> {
        let path = node
            .package_path
            .as_deref()
            .ok_or_else(|| PkgError::install_failed(format!("No archive for {}", node.name)))?;
        self.renv
            .install(path, self.overwrite, &self.overwrite_names)
            .await
    }
}

/// Write the install commands of a live R environment to a script.
#[derive(Debug, Clone)]
pub struct DryRunAction<'a> {
    pub renv: &'a REnvProvider,
    pub script_dir: PathBuf,
    pub overwrite: bool,
    pub overwrite_names: Vec<String>,
}

impl NodeAction for DryRunAction<'_> {
    async fn apply(&self, node: &PackageMetadata) -> Result<PackStatus, PkgError> {
        let path = node
            .package_path
            .as_deref()
            .ok_or_else(|| PkgError::install_failed(format!("No archive for {}", node.name)))?;
        self.renv
            .install_dry_run(path, &self.script_dir, self.overwrite, &self.overwrite_names)
    }
}

/// A package the action ran on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackNode {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Outcome of the action.
    pub status: PackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Aggregate outcome of a resolution run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveReport {
    /// Packages in the order their action ran.
    pub processed: Vec<PackNode>,
    pub not_found: Vec<String>,
    /// Transport failures and unparsable archives.
    pub download_failed: Vec<String>,
    /// Package name to the reason its action failed.
    pub action_failed: BTreeMap<String, String>,
    /// Metadata fetches issued.
    pub fetch_count: usize,
}

impl ResolveReport {
    /// No package failed in any way.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.not_found.is_empty() && self.download_failed.is_empty() && self.action_failed.is_empty()
    }
}

enum Frame {
    Enter(String),
    /// Canonical name, the name it was requested as when different, metadata.
    Exit(String, Option<String>, PackageMetadata),
}

/// Post-order dependency walker over one provider.
///
/// Memo tables live as long as the manager, so repeated requests for the
/// same name are answered without refetching.
pub struct DepsManager<'a, P: Provider> {
    provider: &'a P,
    selector: Selector,
    base: BasePackages,
    cancel: CancellationToken,
    processed: Vec<PackNode>,
    processed_names: HashSet<String>,
    not_found: BTreeSet<String>,
    download_failed: BTreeSet<String>,
    action_failed: BTreeMap<String, String>,
    fetch_count: usize,
}

impl<'a, P: Provider> DepsManager<'a, P> {
    #[must_use]
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            selector: Selector::Any,
            base: BasePackages::default(),
            cancel: CancellationToken::new(),
            processed: Vec::new(),
            processed_names: HashSet::new(),
            not_found: BTreeSet::new(),
            download_failed: BTreeSet::new(),
            action_failed: BTreeMap::new(),
            fetch_count: 0,
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
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Metadata fetches issued so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    fn is_settled(&self, name: &str) -> bool {
        self.base.contains(name)
            || self.processed_names.contains(name)
            || self.not_found.contains(name)
            || self.download_failed.contains(name)
    }

    async fn fetch(&mut self, name: &str, keep: bool) -> Result<PackageMetadata, PkgError> {
        self.fetch_count += 1;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(PkgError::cancelled()),
            meta = self.provider.fetch_metadata(name, &self.selector, keep) => meta,
        }
    }

    /// Resolve `name` and its dependencies, running `action` on each.
    ///
    /// # Errors
    /// Only on cancellation or a request the provider rejects outright;
    /// per-package failures are recorded in the report instead. Temporary
    /// archives held by pending nodes are released on every exit path.
    pub async fn processnode<A: NodeAction>(&mut self, name: &str, action: &A) -> Result<(), PkgError> {
        let keep = action.needs_archive();
        let mut in_progress: HashSet<String> = HashSet::new();
        let mut stack = vec![Frame::Enter(name.to_string())];

        while let Some(frame) = stack.pop() {
            if self.cancel.is_cancelled() {
                warn!(package = name, "resolution cancelled");
                return Err(PkgError::cancelled());
            }

            match frame {
                Frame::Enter(name) => {
                    if self.is_settled(&name) || in_progress.contains(&name) {
                        continue;
                    }

                    let meta = self.fetch(&name, keep).await?;
                    match meta.status {
                        PackStatus::NotFound => {
                            error!(provider = self.provider.name(), package = %name, "package not found");
                            self.not_found.insert(name);
                            continue;
                        }
                        status if status.is_failure() => {
                            error!(
                                provider = self.provider.name(),
                                package = %name,
                                status = %status,
                                detail = meta.status_detail.as_deref().unwrap_or(""),
                                "cannot fetch package"
                            );
                            self.download_failed.insert(name);
                            continue;
                        }
                        _ => {}
                    }

                    // `repo/name` requests settle under the manifest name
                    let (name, alias) = if meta.name == name {
                        (name, None)
                    } else {
                        (meta.name.clone(), Some(name))
                    };
                    if let Some(alias) = &alias {
                        if self.is_settled(&name) || in_progress.contains(&name) {
                            debug!(package = %name, requested = %alias, "already handled");
                            self.processed_names.insert(alias.clone());
                            continue;
                        }
                    }

                    let deps = meta.dependencies(&self.base);
                    debug!(package = %name, deps = ?deps, "resolving dependencies");
                    in_progress.insert(name.clone());
                    stack.push(Frame::Exit(name, alias, meta));
                    stack.extend(deps.into_iter().rev().map(Frame::Enter));
                }
                Frame::Exit(name, alias, mut meta) => {
                    in_progress.remove(&name);
                    let status = match action.apply(&meta).await {
                        Ok(status) if !status.is_failure() => status,
                        Ok(status) => {
                            self.action_failed.insert(name.clone(), status.to_string());
                            status
                        }
                        Err(e) => {
                            error!(package = %name, error = %e, "action failed");
                            let status = e.status();
                            self.action_failed.insert(name.clone(), e.to_string());
                            status
                        }
                    };
                    meta.release();
                    info!(package = %name, status = %status, "processed");
                    self.processed.push(PackNode {
                        name: name.clone(),
                        version: meta.version.take(),
                        status,
                        provider: meta.provider.take(),
                    });
                    self.processed_names.insert(name);
                    if let Some(alias) = alias {
                        self.processed_names.insert(alias);
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve several roots in order and report.
    ///
    /// # Errors
    /// See [`DepsManager::processnode`].
    pub async fn process_all<A: NodeAction>(
        &mut self,
        names: &[String],
        action: &A,
    ) -> Result<ResolveReport, PkgError> {
        for name in names {
            self.processnode(name, action).await?;
        }
        Ok(self.report())
    }

    /// Snapshot of the memo tables.
    #[must_use]
    pub fn report(&self) -> ResolveReport {
        ResolveReport {
            processed: self.processed.clone(),
            not_found: self.not_found.iter().cloned().collect(),
            download_failed: self.download_failed.iter().cloned().collect(),
            action_failed: self.action_failed.clone(),
            fetch_count: self.fetch_count,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    /// In-memory provider recording every fetch.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        packages: BTreeMap<String, (Vec<String>, PackStatus)>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        pub(crate) fn with(mut self, name: &str, imports: &[&str]) -> Self {
            self.packages.insert(
                name.to_string(),
                (imports.iter().map(|s| (*s).to_string()).collect(), PackStatus::Parsed),
            );
            self
        }

        pub(crate) fn broken(mut self, name: &str, status: PackStatus) -> Self {
            self.packages.insert(name.to_string(), (Vec::new(), status));
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn list(&self, _selector: &Selector) -> Result<Vec<String>, PkgError> {
            Ok(self.packages.keys().cloned().collect())
        }

        async fn fetch_metadata(
            &self,
            name: &str,
            _selector: &Selector,
            _keep_temp_files: bool,
        ) -> Result<PackageMetadata, PkgError> {
            self.calls.lock().unwrap().push(name.to_string());
            // `repo/name` addresses `name`
            let name = name.rsplit('/').next().unwrap_or(name);
            Ok(match self.packages.get(name) {
                Some((imports, status)) => {
                    let mut meta = PackageMetadata::placeholder(name, *status);
                    meta.version = Some("1.0".into());
                    meta.imports.clone_from(imports);
                    meta
                }
                None => PackageMetadata::placeholder(name, PackStatus::NotFound),
            })
        }

        async fn download_one(
            &self,
            _name: &str,
            _selector: &Selector,
            _dest: &Path,
        ) -> Result<PackStatus, PkgError> {
            Ok(PackStatus::Downloaded)
        }

        async fn publish_one(
            &self,
            _path: &Path,
            _dest: &Selector,
            _overwrite: bool,
            _overwrite_names: &[String],
        ) -> Result<PackStatus, PkgError> {
            Ok(PackStatus::Deployed)
        }

        async fn check_connection(&self, _max_attempts: u32) -> bool {
            true
        }
    }

    /// Records the order the action ran in; fails for `fail`.
    #[derive(Default)]
    struct Recorder {
        order: Mutex<Vec<String>>,
        fail: Option<&'static str>,
    }

    impl NodeAction for Recorder {
        fn needs_archive(&self) -> bool {
            false
        }

        async fn apply(&self, node: &PackageMetadata) -> Result<PackStatus, PkgError> {
            self.order.lock().unwrap().push(node.name.clone());
            if self.fail == Some(node.name.as_str()) {
                return Err(PkgError::install_failed("boom"));
            }
            Ok(PackStatus::Deployed)
        }
    }

    impl Recorder {
        fn order(&self) -> Vec<String> {
            self.order.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_post_order() {
        let provider = FakeProvider::default()
            .with("A", &["B", "C"])
            .with("B", &["C"])
            .with("C", &[]);
        let action = Recorder::default();
        let mut manager = DepsManager::new(&provider);
        manager.processnode("A", &action).await.unwrap();

        assert_eq!(action.order(), vec!["C", "B", "A"]);
        assert_eq!(manager.fetch_count(), 3);
        assert!(manager.report().is_success());
    }

    #[tokio::test]
    async fn test_memoized_across_requests() {
        let provider = FakeProvider::default()
            .with("A", &["B"])
            .with("B", &[]);
        let action = Recorder::default();
        let mut manager = DepsManager::new(&provider);
        manager.processnode("A", &action).await.unwrap();
        manager.processnode("A", &action).await.unwrap();
        manager.processnode("B", &action).await.unwrap();

        assert_eq!(provider.calls(), vec!["A", "B"]);
        assert_eq!(action.order(), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_base_packages_never_fetched() {
        let provider = FakeProvider::default().with("A", &["utils", "methods", "B"]).with("B", &[]);
        let mut manager = DepsManager::new(&provider);
        manager.processnode("A", &NoAction).await.unwrap();
        manager.processnode("stats", &NoAction).await.unwrap();

        assert_eq!(provider.calls(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_root_action_runs_despite_missing_dependency() {
        let provider = FakeProvider::default().with("A", &["Missing"]);
        let action = Recorder::default();
        let mut manager = DepsManager::new(&provider);
        manager.processnode("A", &action).await.unwrap();

        let report = manager.report();
        assert_eq!(report.not_found, vec!["Missing"]);
        assert_eq!(action.order(), vec!["A"]);
        assert_eq!(report.processed[0].name, "A");
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_not_found_memo_fails_fast() {
        let provider = FakeProvider::default()
            .with("A", &["Missing"])
            .with("B", &["Missing"]);
        let mut manager = DepsManager::new(&provider);
        manager.processnode("A", &NoAction).await.unwrap();
        manager.processnode("B", &NoAction).await.unwrap();

        assert_eq!(provider.calls(), vec!["A", "Missing", "B"]);
    }

    #[tokio::test]
    async fn test_download_failures_recorded() {
        let provider = FakeProvider::default()
            .with("A", &["Flaky", "Broken"])
            .broken("Flaky", PackStatus::DownloadFailed)
            .broken("Broken", PackStatus::Invalid);
        let mut manager = DepsManager::new(&provider);
        manager.processnode("A", &NoAction).await.unwrap();

        let report = manager.report();
        assert_eq!(report.download_failed, vec!["Broken", "Flaky"]);
        assert_eq!(report.processed.len(), 1);
    }

    #[tokio::test]
    async fn test_repo_qualified_root_settles_package_name() {
        let provider = FakeProvider::default()
            .with("A", &["C"])
            .with("B", &["A"])
            .with("C", &[]);
        let action = Recorder::default();
        let mut manager = DepsManager::new(&provider);
        manager.processnode("src/A", &action).await.unwrap();
        manager.processnode("B", &action).await.unwrap();
        manager.processnode("src/A", &action).await.unwrap();

        assert_eq!(provider.calls(), vec!["src/A", "C", "B"]);
        assert_eq!(action.order(), vec!["C", "A", "B"]);
        assert_eq!(manager.report().processed[1].name, "A");
    }

    #[tokio::test]
    async fn test_repo_qualified_request_after_package_name() {
        let provider = FakeProvider::default().with("A", &[]);
        let action = Recorder::default();
        let mut manager = DepsManager::new(&provider);
        manager.processnode("A", &action).await.unwrap();
        manager.processnode("src/A", &action).await.unwrap();
        manager.processnode("src/A", &action).await.unwrap();

        assert_eq!(provider.calls(), vec!["A", "src/A"]);
        assert_eq!(action.order(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let provider = FakeProvider::default()
            .with("A", &["B"])
            .with("B", &["A"]);
        let action = Recorder::default();
        let mut manager = DepsManager::new(&provider);
        manager.processnode("A", &action).await.unwrap();

        assert_eq!(action.order(), vec!["B", "A"]);
        assert_eq!(manager.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_deep_chain() {
        let mut provider = FakeProvider::default();
        let depth = 20_000;
        for i in 0..depth {
            let next = format!("p{}", i + 1);
            provider = provider.with(&format!("p{i}"), &[next.as_str()]);
        }
        provider = provider.with(&format!("p{depth}"), &[]);

        let mut manager = DepsManager::new(&provider);
        manager.processnode("p0", &NoAction).await.unwrap();
        assert_eq!(manager.report().processed.len(), depth + 1);
        assert_eq!(manager.report().processed[0].name, format!("p{depth}"));
    }

    #[tokio::test]
    async fn test_action_failure_recorded() {
        let provider = FakeProvider::default().with("A", &["B"]).with("B", &[]);
        let action = Recorder {
            fail: Some("B"),
            ..Default::default()
        };
        let mut manager = DepsManager::new(&provider);
        let report = manager
            .process_all(&["A".to_string()], &action)
            .await
            .unwrap();

        assert!(report.action_failed["B"].contains("boom"));
        assert_eq!(action.order(), vec!["B", "A"]);
        assert_eq!(report.processed[0].status, PackStatus::DeployFailed);
        assert_eq!(report.processed[1].status, PackStatus::Deployed);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let provider = FakeProvider::default().with("A", &[]);
        let token = CancellationToken::new();
        token.cancel();
        let mut manager = DepsManager::new(&provider).with_cancellation(token);
        let err = manager.processnode("A", &NoAction).await.unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_CANCELLED);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_download_action_copies_archives() {
        use crate::config::LocalRepoConfig;
        use crate::pkg::description::tests::build_archive;
        use crate::pkg::providers::LocalProvider;

        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir(repo.path().join("src")).unwrap();
        for (name, imports) in [("top", "dep"), ("dep", "utils")] {
            let manifest = format!("Package: {name}\nVersion: 1.0\nImports: {imports}\n");
            std::fs::write(
                repo.path().join("src").join(format!("{name}_1.0.tar.gz")),
                build_archive(&[(&format!("{name}/DESCRIPTION"), &manifest)]),
            )
            .unwrap();
        }
        let provider = LocalProvider::new(
            "mirror",
            &LocalRepoConfig {
                baseurl: repo.path().to_path_buf(),
                repos: vec!["src".into()],
            },
        )
        .unwrap();

        let dest = tempfile::tempdir().unwrap();
        let action = DownloadAction {
            dest: dest.path().to_path_buf(),
        };
        let mut manager = DepsManager::new(&provider);
        let report = manager
            .process_all(&["top".to_string()], &action)
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(dest.path().join("top_1.0.tar.gz").exists());
        assert!(dest.path().join("dep_1.0.tar.gz").exists());
    }
}
