//! Process-wide exclusive claims on filesystem paths.
//!
//! Output locations and staged sources may each belong to one live run at a
//! time. A [`PathClaim`] records ownership in a [`PathRegistry`] and gives it
//! back on drop. Callers pass canonical paths so aliases of one directory
//! (`frames`, `x/../frames`, a symlink) compete for the same entry.

use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Paths currently claimed by live runs.
pub(crate) struct PathRegistry {
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl PathRegistry {
    pub(crate) const fn new() -> Self {
        Self {
            paths: Mutex::new(BTreeSet::new()),
        }
    }

    /// Claim `path`, or `None` if a live claim already holds it.
    pub(crate) fn claim(&'static self, path: PathBuf) -> Option<PathClaim> {
        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        if !paths.insert(path.clone()) {
            return None;
        }
        Some(PathClaim {
            registry: self,
            path,
        })
    }

    #[cfg(test)]
    fn contains(&self, path: &Path) -> bool {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }
}

impl Debug for PathRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PathRegistry").finish_non_exhaustive()
    }
}

/// Ownership of one path in a [`PathRegistry`], released on drop.
#[derive(Debug)]
pub(crate) struct PathClaim {
    registry: &'static PathRegistry,
    path: PathBuf,
}

impl PathClaim {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        self.registry
            .paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static REGISTRY: PathRegistry = PathRegistry::new();

    #[test]
    fn claims_are_exclusive_until_dropped() {
        let path = PathBuf::from("/claims/test");
        let claim = REGISTRY.claim(path.clone()).expect("First claim");
        assert_eq!(claim.path(), path);
        assert!(REGISTRY.claim(path.clone()).is_none());

        drop(claim);
        assert!(!REGISTRY.contains(&path));
        assert!(REGISTRY.claim(path).is_some());
    }

    #[test]
    fn different_paths_do_not_conflict() {
        let first = REGISTRY.claim(PathBuf::from("/claims/a"));
        let second = REGISTRY.claim(PathBuf::from("/claims/b"));
        assert!(first.is_some() && second.is_some());
    }
}
