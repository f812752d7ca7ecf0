// src/resolver/mod.rs

//! Transitive dependency resolution.
//!
//! The resolver walks Requires edges through the multi-repo client,
//! skipping a fixed denylist of virtual capabilities and tolerating
//! cycles: a package re-encountered on the walk is logged and not
//! recursed into. Resolution returns partial results together with the
//! first error, so diagnostic callers can keep going where the install
//! planner must fail.

use crate::error::Error;
use crate::repository::Client;
use crate::rpm::Package;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Capabilities never resolved to a provider.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "rpmlib(CompressedFileNames)",
    "rpmlib(PayloadFilesHavePrefix)",
    "rpmlib(PartialHardlinkSets)",
    "/bin/sh",
];

/// Build the default denylist as an owned set.
pub fn default_denylist() -> HashSet<String> {
    DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect()
}

/// Outcome of a dependency walk: the packages reached, plus the first
/// error encountered (missing providers are recorded, not fatal here).
pub struct Resolution {
    pub packages: Vec<Arc<Package>>,
    pub error: Option<Error>,
}

impl Resolution {
    /// Promote the recorded error, if any, keeping the packages otherwise.
    pub fn into_result(self) -> crate::error::Result<Vec<Arc<Package>>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.packages),
        }
    }
}

/// Dependency resolver over a loaded client.
pub struct Resolver<'a> {
    client: &'a Client,
    denylist: HashSet<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(client: &'a Client, denylist: HashSet<String>) -> Self {
        Self { client, denylist }
    }

    /// `pkg` plus its transitive dependencies, deduplicated by RPM
    /// filename.
    pub fn required_packages(&self, pkg: &Arc<Package>) -> Resolution {
        let mut resolution = self.package_deps(pkg);
        resolution.packages.push(Arc::clone(pkg));

        let mut seen = HashSet::new();
        resolution
            .packages
            .retain(|p| seen.insert(p.rpm_file_name()));
        resolution
    }

    /// Transitive dependencies of `pkg`, excluding `pkg` itself unless a
    /// cycle reaches back to it.
    pub fn package_deps(&self, pkg: &Arc<Package>) -> Resolution {
        let mut processed = HashSet::new();
        let mut packages = Vec::new();
        let mut error = None;

        self.walk(pkg, &mut processed, &mut packages, &mut error);
        Resolution { packages, error }
    }

    fn walk(
        &self,
        pkg: &Arc<Package>,
        processed: &mut HashSet<String>,
        out: &mut Vec<Arc<Package>>,
        first_error: &mut Option<Error>,
    ) {
        for req in pkg.requires() {
            if self.denylist.contains(req.name()) {
                debug!("skipping denylisted requirement {}", req.name());
                continue;
            }

            let provider = match self.client.find_latest_by_require(req) {
                Ok(p) => p,
                Err(e) => {
                    warn!(
                        "no provider for {} (required by {}): {e}",
                        req.name(),
                        pkg.rpm_name()
                    );
                    if first_error.is_none() {
                        *first_error = Some(e);
                    }
                    continue;
                }
            };

            let fname = provider.rpm_file_name();
            if processed.contains(&fname) {
                warn!(
                    "cyclic dependency: {} already visited (required by {})",
                    provider.rpm_name(),
                    pkg.rpm_name()
                );
                continue;
            }
            processed.insert(fname);
            out.push(Arc::clone(&provider));
            self.walk(&provider, processed, out, first_error);
        }
    }
}
