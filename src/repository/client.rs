// src/repository/client.rs

//! Multi-repository client.
//!
//! Aggregates the configured repositories and answers cross-repo
//! lookups. Each repository is queried independently; the successes are
//! sorted under the NEVRA order and the maximum wins, so the outcome is
//! stable regardless of query order.

use crate::config::RepoConfig;
use crate::error::{Error, Result};
use crate::rpm::{rpm_cmp, Package, ReqFlag, Requires};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{BackendKind, Repository};

/// Aggregate view over every configured repository.
pub struct Client {
    repos: BTreeMap<String, Repository>,
}

impl Client {
    /// Build a client from repository configs.
    ///
    /// Each repository caches under `<cache_root>/<name>/`. Disabled
    /// entries are skipped.
    pub fn open(
        configs: &[RepoConfig],
        cache_root: &Path,
        kinds: &[BackendKind],
        check_for_updates: bool,
        denylist: Arc<HashSet<String>>,
    ) -> Result<Self> {
        let mut client = Self::empty();
        for cfg in configs {
            if !cfg.enabled {
                debug!("skipping disabled repository {}", cfg.name);
                continue;
            }
            let cache_dir = cache_root.join(&cfg.name);
            let repo = Repository::open(
                &cfg.name,
                &cfg.baseurl,
                &cache_dir,
                kinds,
                check_for_updates,
                denylist.clone(),
            )?;
            client.add_repository(repo);
        }
        info!("configured {} repositories", client.repos.len());
        Ok(client)
    }

    /// A client with no repositories. Tests and diagnostics attach
    /// preloaded repositories with [`Client::add_repository`].
    pub fn empty() -> Self {
        Self {
            repos: BTreeMap::new(),
        }
    }

    pub fn add_repository(&mut self, repo: Repository) {
        self.repos.insert(repo.name().to_string(), repo);
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Repository> {
        self.repos.values()
    }

    pub fn repository(&self, name: &str) -> Option<&Repository> {
        self.repos.get(name)
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Latest package named `name` across every repository.
    pub fn find_latest_by_name(
        &self,
        name: &str,
        version: &str,
        release: &str,
    ) -> Result<Arc<Package>> {
        self.query_all(|repo| repo.find_latest_by_name(name, version, release))
    }

    /// Latest package providing `req` across every repository.
    pub fn find_latest_by_require(&self, req: &Requires) -> Result<Arc<Package>> {
        self.query_all(|repo| repo.find_latest_by_require(req))
    }

    /// Latest provider of a `(name, version, release)` triple: capability
    /// match first, plain package-name lookup as fallback.
    pub fn find_latest_provider(
        &self,
        name: &str,
        version: &str,
        release: &str,
    ) -> Result<Arc<Package>> {
        let req = Requires::new(name, version, release, "", ReqFlag::Eq, "");
        match self.find_latest_by_require(&req) {
            Ok(pkg) => Ok(pkg),
            Err(first) => match self.find_latest_by_name(name, version, release) {
                Ok(pkg) => Ok(pkg),
                Err(_) => Err(first),
            },
        }
    }

    /// All packages whose name/version/release match the given regular
    /// expressions. Empty patterns match everything.
    pub fn list_packages(
        &self,
        name_pattern: &str,
        version_pattern: &str,
        release_pattern: &str,
    ) -> Result<Vec<Arc<Package>>> {
        let name_re = compile_filter(name_pattern)?;
        let version_re = compile_filter(version_pattern)?;
        let release_re = compile_filter(release_pattern)?;

        let matches_filter = |re: &Option<Regex>, s: &str| match re {
            Some(re) => re.is_match(s),
            None => true,
        };

        let mut pkgs: Vec<Arc<Package>> = Vec::new();
        for repo in self.repos.values() {
            for pkg in repo.all_packages() {
                if matches_filter(&name_re, pkg.name())
                    && matches_filter(&version_re, pkg.version())
                    && matches_filter(&release_re, pkg.release())
                {
                    pkgs.push(pkg);
                }
            }
        }
        pkgs.sort_by(|a, b| rpm_cmp(a.nevra(), b.nevra()));
        Ok(pkgs)
    }

    /// Release every repository's backend resources.
    pub fn close(&mut self) {
        for repo in self.repos.values_mut() {
            repo.close();
        }
    }

    fn query_all<F>(&self, query: F) -> Result<Arc<Package>>
    where
        F: Fn(&Repository) -> Result<Arc<Package>>,
    {
        let mut found: Vec<Arc<Package>> = Vec::new();
        let mut first_error: Option<Error> = None;

        for repo in self.repos.values() {
            match query(repo) {
                Ok(pkg) => found.push(pkg),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if found.is_empty() {
            return Err(first_error
                .unwrap_or_else(|| Error::NotFound("no repositories configured".to_string())));
        }
        found.sort_by(|a, b| rpm_cmp(a.nevra(), b.nevra()));
        Ok(found.pop().expect("non-empty"))
    }
}

fn compile_filter(pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| Error::ConfigError(format!("bad pattern {pattern:?}: {e}")))
}
