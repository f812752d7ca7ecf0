// src/repository/backend.rs

//! Index backend abstraction.
//!
//! A backend knows how to fetch and query one flavor of primary index.
//! Repositories try backend kinds in priority order against the types
//! advertised by `repomd.xml` and keep the first one that loads.

use crate::error::{Error, Result};
use crate::rpm::{rpm_cmp, rpm_equal, Package, Provides, ReqFlag, Requires};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::sqlite::SqliteBackend;
use super::xml::XmlBackend;

/// Query interface over one loaded primary index.
pub trait Backend {
    /// The data type this backend matches in `repomd.xml`.
    fn data_type(&self) -> &'static str;

    /// Download the index artifact at `url` into the cache directory.
    fn fetch_latest(&mut self, url: &str) -> Result<()>;

    /// Path of the cached index artifact as advertised in repomd (the
    /// file checksums apply to).
    fn cached_artifact(&self) -> &std::path::Path;

    /// Whether the cached index artifact is present.
    fn has_db(&self) -> bool;

    /// Load the cached index so queries can run.
    fn load_db(&mut self) -> Result<()>;

    /// Latest package with `name`, optionally pinned to a version and
    /// release (empty strings match anything).
    fn find_latest_by_name(&self, name: &str, version: &str, release: &str)
        -> Result<Arc<Package>>;

    /// Latest package providing the required capability.
    fn find_latest_by_require(&self, req: &Requires) -> Result<Arc<Package>>;

    /// Every package known to this index.
    fn all_packages(&self) -> Vec<Arc<Package>>;

    /// Release index resources (database handles, in-memory maps).
    fn close(&mut self);
}

/// Concrete backend kinds, in the order repositories try them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Xml,
}

/// Default priority: the SQLite index is cheaper to query, the XML
/// index is the universal fallback.
pub const DEFAULT_BACKENDS: &[BackendKind] = &[BackendKind::Sqlite, BackendKind::Xml];

impl BackendKind {
    pub fn data_type(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "primary_db",
            BackendKind::Xml => "primary",
        }
    }

    /// Construct an unloaded backend for a repository.
    pub fn create(
        &self,
        repo_name: &str,
        repo_url: &str,
        cache_dir: &std::path::Path,
        denylist: Arc<HashSet<String>>,
    ) -> Box<dyn Backend> {
        match self {
            BackendKind::Sqlite => {
                Box::new(SqliteBackend::new(repo_name, repo_url, cache_dir, denylist))
            }
            BackendKind::Xml => {
                Box::new(XmlBackend::new(repo_name, repo_url, cache_dir, denylist))
            }
        }
    }
}

/// Pick the newest package among `candidates` that satisfies an exact
/// (name, version, release) requirement; empty fields match anything.
pub(crate) fn pick_latest_matching(
    candidates: &[Arc<Package>],
    name: &str,
    version: &str,
    release: &str,
) -> Result<Arc<Package>> {
    let req = Requires::new(name, version, release, "", ReqFlag::Eq, "");
    let mut matching: Vec<&Arc<Package>> = candidates
        .iter()
        .filter(|p| req.provide_matches(p.nevra()))
        .collect();

    if matching.is_empty() {
        return Err(Error::NotFound(format!("no such package {name:?}")));
    }
    matching.sort_by(|a, b| rpm_cmp(a.nevra(), b.nevra()));
    Ok(Arc::clone(matching[matching.len() - 1]))
}

/// A capability map entry: the advertised Provides plus its owner.
#[derive(Debug, Clone)]
pub(crate) struct ProviderEntry {
    pub provides: Provides,
    pub package: Arc<Package>,
}

/// In-memory package catalog shared by fully-loaded backends.
///
/// Invariant: every entry in the capability map references a package
/// present in the name map.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    packages: HashMap<String, Vec<Arc<Package>>>,
    provides: HashMap<String, Vec<ProviderEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a loaded package. Denylisted capabilities are skipped at
    /// Provides indexing time; denylisted Requires stay on the package
    /// and are skipped later by the resolver.
    pub fn insert(&mut self, pkg: Arc<Package>, denylist: &HashSet<String>) {
        for prov in pkg.provides() {
            if denylist.contains(prov.name()) {
                continue;
            }
            self.provides
                .entry(prov.name().to_string())
                .or_default()
                .push(ProviderEntry {
                    provides: prov.clone(),
                    package: Arc::clone(&pkg),
                });
        }
        self.packages
            .entry(pkg.name().to_string())
            .or_default()
            .push(pkg);
    }

    pub fn find_latest_by_name(
        &self,
        name: &str,
        version: &str,
        release: &str,
    ) -> Result<Arc<Package>> {
        let candidates = self
            .packages
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("no such package {name:?}")))?;
        pick_latest_matching(candidates, name, version, release)
    }

    pub fn find_latest_by_require(&self, req: &Requires) -> Result<Arc<Package>> {
        let entries = self
            .provides
            .get(req.name())
            .ok_or_else(|| Error::NoProvider(req.name().to_string()))?;

        let mut matching: Vec<&ProviderEntry> = entries
            .iter()
            .filter(|e| req.provide_matches(&e.provides.nevra))
            .collect();
        if matching.is_empty() {
            return Err(Error::NoProvider(req.name().to_string()));
        }

        matching.sort_by(|a, b| rpm_cmp(&a.provides.nevra, &b.provides.nevra));
        let best = &matching[matching.len() - 1].provides.nevra;

        // Several packages may advertise the winning capability; take
        // the newest of them.
        let mut owners: Vec<&Arc<Package>> = matching
            .iter()
            .filter(|e| rpm_equal(&e.provides.nevra, best))
            .map(|e| &e.package)
            .collect();
        owners.sort_by(|a, b| rpm_cmp(a.nevra(), b.nevra()));
        Ok(Arc::clone(owners[owners.len() - 1]))
    }

    pub fn all_packages(&self) -> Vec<Arc<Package>> {
        let mut pkgs: Vec<Arc<Package>> = self
            .packages
            .values()
            .flat_map(|v| v.iter().cloned())
            .collect();
        pkgs.sort_by(|a, b| rpm_cmp(a.nevra(), b.nevra()));
        pkgs
    }

    pub fn clear(&mut self) {
        self.packages.clear();
        self.provides.clear();
    }
}
