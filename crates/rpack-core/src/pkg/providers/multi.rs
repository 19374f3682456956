//! Several providers searched in order.

use super::Backend;
use crate::pkg::error::PkgError;
use crate::pkg::metadata::{PackStatus, PackageMetadata};
use crate::pkg::provider::{metadata_from_error, Provider, Selector};
use std::path::Path;
use tracing::{debug, warn};

/// Ordered providers; the first one that knows a package answers for it.
///
/// A member may carry its own selector, used in place of the caller's.
#[derive(Debug)]
pub struct MultiProvider<P = Backend> {
    name: String,
    members: Vec<(P, Option<Selector>)>,
}

impl<P: Provider> MultiProvider<P> {
    /// Every member receives the caller's selector.
    #[must_use]
    pub fn new(providers: Vec<P>) -> Self {
        Self::from_members(providers.into_iter().map(|p| (p, None)).collect())
    }

    /// Every member uses its own selector.
    #[must_use]
    pub fn with_selectors(members: Vec<(P, Selector)>) -> Self {
        Self::from_members(members.into_iter().map(|(p, s)| (p, Some(s))).collect())
    }

    fn from_members(members: Vec<(P, Option<Selector>)>) -> Self {
        let name = members
            .iter()
            .map(|(p, _)| p.name())
            .collect::<Vec<_>>()
            .join("+");
        Self { name, members }
    }

    pub fn providers(&self) -> impl Iterator<Item = &P> {
        self.members.iter().map(|(p, _)| p)
    }

    fn addressed<'s>(&'s self, selector: &'s Selector) -> impl Iterator<Item = (&'s P, &'s Selector)> {
        self.members
            .iter()
            .map(move |(p, own)| (p, own.as_ref().unwrap_or(selector)))
    }
}

impl<P: Provider> Provider for MultiProvider<P> {
    fn name(&self) -> &str {
        &self.name
    }

    /// Concatenated listings, in provider order.
    async fn list(&self, selector: &Selector) -> Result<Vec<String>, PkgError> {
        let mut all = Vec::new();
        for (provider, selector) in self.addressed(selector) {
            all.extend(provider.list(selector).await?);
        }
        Ok(all)
    }

    async fn fetch_metadata(
        &self,
        name: &str,
        selector: &Selector,
        keep_temp_files: bool,
    ) -> Result<PackageMetadata, PkgError> {
        for (provider, selector) in self.addressed(selector) {
            match provider.fetch_metadata(name, selector, keep_temp_files).await {
                Ok(meta) if meta.status == PackStatus::NotFound => {
                    debug!(provider = provider.name(), package = name, "not here, trying next");
                }
                Ok(meta) => return Ok(meta),
                Err(e) => {
                    warn!(provider = provider.name(), package = name, error = %e, "skipping provider");
                }
            }
        }
        Ok(metadata_from_error(&self.name, name, &PkgError::not_found(name)))
    }

    async fn download_one(
        &self,
        name: &str,
        selector: &Selector,
        dest: &Path,
    ) -> Result<PackStatus, PkgError> {
        for (provider, selector) in self.addressed(selector) {
            match provider.download_one(name, selector, dest).await {
                Ok(PackStatus::NotFound) => {}
                Ok(status) => return Ok(status),
                Err(e) => {
                    warn!(provider = provider.name(), package = name, error = %e, "skipping provider");
                }
            }
        }
        Ok(PackStatus::NotFound)
    }

    async fn publish_one(
        &self,
        _path: &Path,
        _dest: &Selector,
        _overwrite: bool,
        _overwrite_names: &[String],
    ) -> Result<PackStatus, PkgError> {
        Err(PkgError::not_implemented("Publishing to several repositories at once"))
    }

    /// Every provider must answer.
    async fn check_connection(&self, max_attempts: u32) -> bool {
        for provider in self.providers() {
            if !provider.check_connection(max_attempts).await {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalRepoConfig;
    use crate::pkg::description::tests::build_archive;
    use crate::pkg::providers::LocalProvider;
    use tempfile::{tempdir, TempDir};

    fn repo(name: &str, packages: &[(&str, &str)]) -> (TempDir, LocalProvider) {
        repo_in(name, "src", packages, "")
    }

    fn repo_in(
        name: &str,
        folder: &str,
        packages: &[(&str, &str)],
        extra: &str,
    ) -> (TempDir, LocalProvider) {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(folder)).unwrap();
        for (package, version) in packages {
            let manifest = format!("Package: {package}\nVersion: {version}\n{extra}");
            std::fs::write(
                dir.path().join(folder).join(format!("{package}_{version}.tar.gz")),
                build_archive(&[(&format!("{package}/DESCRIPTION"), &manifest)]),
            )
            .unwrap();
        }
        let config = LocalRepoConfig {
            baseurl: dir.path().to_path_buf(),
            repos: vec![folder.into()],
        };
        (dir, LocalProvider::new(name, &config).unwrap())
    }

    #[tokio::test]
    async fn test_first_provider_wins() {
        let (_a, first) = repo("first", &[("Rcpp", "1.0")]);
        let (_b, second) = repo("second", &[("Rcpp", "2.0"), ("a4", "1.0")]);
        let multi = MultiProvider::new(vec![first, second]);
        assert_eq!(multi.name(), "first+second");

        let rcpp = multi.fetch_metadata("Rcpp", &Selector::Any, false).await.unwrap();
        assert_eq!(rcpp.version.as_deref(), Some("1.0"));
        assert_eq!(rcpp.provider.as_deref(), Some("first"));

        let a4 = multi.fetch_metadata("a4", &Selector::Any, false).await.unwrap();
        assert_eq!(a4.provider.as_deref(), Some("second"));

        let none = multi.fetch_metadata("zzz", &Selector::Any, false).await.unwrap();
        assert_eq!(none.status, PackStatus::NotFound);

        assert_eq!(multi.list(&Selector::Any).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_members_keep_their_own_selector() {
        let (_a, primary) = repo_in("primary", "src", &[("top", "1.0")], "Imports: dep\n");
        let (_b, fallback) = repo_in("fallback", "other", &[("dep", "2.0")], "");
        let multi = MultiProvider::with_selectors(vec![
            (primary, Selector::Repo("src".into())),
            (fallback, Selector::Any),
        ]);

        let caller = Selector::Repo("src".into());
        let dep = multi.fetch_metadata("dep", &caller, false).await.unwrap();
        assert_eq!(dep.status, PackStatus::Parsed);
        assert_eq!(dep.provider.as_deref(), Some("fallback"));

        let graph = crate::pkg::DepTree::new(&multi)
            .with_selector(caller)
            .build(&["top".to_string()])
            .await
            .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert!(graph.unresolved().is_empty());
    }

    #[tokio::test]
    async fn test_shared_selector_rejected_by_other_member() {
        let (_a, primary) = repo_in("primary", "src", &[("top", "1.0")], "");
        let (_b, fallback) = repo_in("fallback", "other", &[("dep", "2.0")], "");
        let multi = MultiProvider::new(vec![primary, fallback]);

        let dep = multi
            .fetch_metadata("dep", &Selector::Repo("src".into()), false)
            .await
            .unwrap();
        assert_eq!(dep.status, PackStatus::NotFound);
    }
}
