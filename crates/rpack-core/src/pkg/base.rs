//! Packages shipped with every R installation.

use std::collections::BTreeSet;
use std::sync::Arc;

/// Names of the base R distribution packages.
pub const BASE_PACKAGES: &[&str] = &[
    "R",
    "utils",
    "mgcv",
    "foreign",
    "survival",
    "tcltk",
    "translations",
    "cluster",
    "MASS",
    "grDevices",
    "nlme",
    "grid",
    "base",
    "compiler",
    "KernSmooth",
    "class",
    "spatial",
    "boot",
    "tools",
    "lattice",
    "nnet",
    "graphics",
    "methods",
    "codetools",
    "stats4",
    "rpart",
    "datasets",
    "stats",
    "splines",
    "parallel",
    "Matrix",
];

/// Read-only set of names treated as always installed.
///
/// Cheap to clone; share one instance across resolver, graph builder and
/// providers.
#[derive(Debug, Clone)]
pub struct BasePackages {
    names: Arc<BTreeSet<String>>,
}

impl Default for BasePackages {
    fn default() -> Self {
        Self::from_names(BASE_PACKAGES.iter().copied())
    }
}

impl BasePackages {
    /// Build a set from arbitrary names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: Arc::new(names.into_iter().map(Into::into).collect()),
        }
    }

    /// A set excluding nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_names(std::iter::empty::<String>())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
