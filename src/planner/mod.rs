// src/planner/mod.rs

//! Install and update planning.
//!
//! Planners turn user intent plus the installed-set snapshot into a
//! deterministic plan: which artifacts to download and how to hand them
//! to the driver (install vs update vs upgrade). They never touch the
//! filesystem themselves.

use crate::error::{Error, Result};
use crate::repository::Client;
use crate::resolver::Resolver;
use crate::rpm::{rpm_cmp, rpm_less_than, split_rpm, Nevra, Package};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the installer's own package. It is planned in isolation and
/// always processed ahead of everything else.
pub const SELF_PACKAGE: &str = "sitepkr";

/// Bitset of planned driver actions for one package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mode(u8);

impl Mode {
    pub const INSTALL: Mode = Mode(1);
    pub const UPDATE: Mode = Mode(1 << 1);
    pub const UPGRADE: Mode = Mode(1 << 2);

    pub fn has(self, other: Mode) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Mode) {
        self.0 |= other.0;
    }

    /// Whether the driver should run this entry in the update batch.
    pub fn is_update_like(self) -> bool {
        self.has(Mode::UPDATE) || self.has(Mode::UPGRADE)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.has(Mode::INSTALL) {
            parts.push("install");
        }
        if self.has(Mode::UPDATE) {
            parts.push("update");
        }
        if self.has(Mode::UPGRADE) {
            parts.push("upgrade");
        }
        f.write_str(&parts.join("+"))
    }
}

/// A user-supplied package spec, either `name` alone or a combined
/// `name-version-release` string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpmSpec {
    pub name: String,
    pub version: String,
    pub release: String,
}

impl RpmSpec {
    pub fn new(name: &str, version: &str, release: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
        }
    }

    /// Parse a combined spec with the rightmost-greedy split rule.
    pub fn parse(spec: &str) -> Self {
        let (name, version, release) = split_rpm(spec);
        Self {
            name,
            version,
            release,
        }
    }
}

impl fmt::Display for RpmSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.version.is_empty() {
            write!(f, "-{}", self.version)?;
        }
        if !self.release.is_empty() {
            write!(f, "-{}", self.release)?;
        }
        Ok(())
    }
}

/// Snapshot of the driver's installed database: a complete set of
/// (name, version, release) triples for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct InstalledSet {
    triples: Vec<(String, String, String)>,
}

impl InstalledSet {
    pub fn new(triples: Vec<(String, String, String)>) -> Self {
        Self { triples }
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String, String)> {
        self.triples.iter()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.triples.iter().any(|(n, _, _)| n == name)
    }

    pub fn contains_name_version(&self, name: &str, version: &str) -> bool {
        self.triples
            .iter()
            .any(|(n, v, _)| n == name && v == version)
    }

    pub fn contains_exact(&self, name: &str, version: &str, release: &str) -> bool {
        self.triples
            .iter()
            .any(|(n, v, r)| n == name && v == version && r == release)
    }

    /// `name-version-release` of the newest installed instance of `name`.
    pub fn installed_instance(&self, name: &str) -> Option<Nevra> {
        let mut candidates: Vec<Nevra> = self
            .triples
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(n, v, r)| Nevra::new(n, v, r, ""))
            .collect();
        candidates.sort_by(rpm_cmp);
        candidates.pop()
    }
}

/// One planned package with its driver action.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub package: Arc<Package>,
    pub mode: Mode,
    /// Bypass dependency checks in the driver (`--nodeps`).
    pub force: bool,
}

/// Why an install plan came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReason {
    /// There is work to do.
    Ready,
    /// Every requested package is already installed at its exact NEVRA.
    AlreadyInstalled,
}

/// Ordered result of install planning.
///
/// No two entries share an RPM filename, and a self-package entry, if
/// present, is first.
#[derive(Debug)]
pub struct InstallPlan {
    pub entries: Vec<PlanEntry>,
    pub reason: PlanReason,
}

impl InstallPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries for the update/upgrade driver batch (runs first).
    pub fn update_batch(&self) -> Vec<&PlanEntry> {
        self.entries
            .iter()
            .filter(|e| e.mode.is_update_like() && e.package.name() != SELF_PACKAGE)
            .collect()
    }

    /// Entries for the plain install batch (runs second).
    pub fn install_batch(&self) -> Vec<&PlanEntry> {
        self.entries
            .iter()
            .filter(|e| !e.mode.is_update_like() && e.package.name() != SELF_PACKAGE)
            .collect()
    }

    /// The hoisted self-package entry, when present.
    pub fn self_entry(&self) -> Option<&PlanEntry> {
        self.entries
            .first()
            .filter(|e| e.package.name() == SELF_PACKAGE)
    }
}

/// Install-planning options.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Skip dependency resolution; plan only the named packages.
    pub no_deps: bool,
    /// Bypass the overwrite refusal and the driver's dependency checks.
    pub force: bool,
    /// Drive everything through the update batch (`-Uvh`).
    pub update: bool,
}

/// Update-run flavor: `update` accepts release bumps only, `upgrade`
/// accepts version bumps too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Update,
    Upgrade,
}

/// Classification of one available update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Same version, newer release.
    Update,
    /// Newer version.
    Upgrade,
}

/// One installed package with a newer available counterpart.
#[derive(Debug, Clone)]
pub struct UpdateAction {
    pub installed: Nevra,
    pub available: Arc<Package>,
    pub kind: UpdateKind,
}

/// Result of update planning. The self-package action, when present,
/// is first and must complete before the rest run.
#[derive(Debug, Default)]
pub struct UpdatePlan {
    pub actions: Vec<UpdateAction>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn self_action(&self) -> Option<&UpdateAction> {
        self.actions
            .first()
            .filter(|a| a.installed.name == SELF_PACKAGE)
    }

    pub fn rest(&self) -> &[UpdateAction] {
        match self.self_action() {
            Some(_) => &self.actions[1..],
            None => &self.actions[..],
        }
    }
}

/// Plans installs and updates against an installed-set snapshot.
pub struct Planner<'a> {
    client: &'a Client,
    resolver: &'a Resolver<'a>,
    installed: &'a InstalledSet,
}

impl<'a> Planner<'a> {
    pub fn new(client: &'a Client, resolver: &'a Resolver<'a>, installed: &'a InstalledSet) -> Self {
        Self {
            client,
            resolver,
            installed,
        }
    }

    /// Build the install plan for the given specs.
    ///
    /// Fails with [`Error::InstallConflict`] when a requested name is
    /// installed at a different NEVRA (unless forced), with the first
    /// resolution error when a dependency has no provider, and with
    /// [`Error::NoPackagesToInstall`] when nothing is left to do but not
    /// everything was already installed.
    pub fn plan_install(&self, specs: &[RpmSpec], opts: &InstallOptions) -> Result<InstallPlan> {
        let mut entries: Vec<PlanEntry> = Vec::new();
        let mut satisfied = 0usize;

        for spec in specs {
            let target =
                self.client
                    .find_latest_provider(&spec.name, &spec.version, &spec.release)?;

            if self
                .installed
                .contains_exact(target.name(), target.version(), target.release())
            {
                info!("{} is already installed", target.rpm_name());
                satisfied += 1;
                continue;
            }

            // a different installed *version* is refused; a mere release
            // bump flows into the update batch below
            if !opts.force
                && !opts.update
                && self.installed.contains_name(target.name())
                && !self
                    .installed
                    .contains_name_version(target.name(), target.version())
            {
                let installed = self
                    .installed
                    .installed_instance(target.name())
                    .map(|n| n.rpm_name())
                    .unwrap_or_else(|| target.name().to_string());
                return Err(Error::InstallConflict {
                    installed,
                    requested: target.rpm_name(),
                });
            }

            // The installer itself never drags dependencies along.
            if target.name() == SELF_PACKAGE {
                entries.push(PlanEntry {
                    package: target,
                    mode: Mode::INSTALL,
                    force: true,
                });
                continue;
            }

            if opts.no_deps {
                entries.push(PlanEntry {
                    package: Arc::clone(&target),
                    mode: self.classify_target(&target, opts),
                    force: opts.force,
                });
                continue;
            }

            let closure = self.resolver.required_packages(&target).into_result()?;
            debug!("{}: {} packages in closure", target.rpm_name(), closure.len());
            for pkg in closure {
                let is_target = pkg.rpm_file_name() == target.rpm_file_name();
                let mode = if is_target {
                    self.classify_target(&pkg, opts)
                } else {
                    match self.classify_dependency(&pkg, opts) {
                        Some(mode) => mode,
                        None => continue,
                    }
                };
                entries.push(PlanEntry {
                    package: pkg,
                    mode,
                    force: opts.force,
                });
            }
        }

        let entries = hoist_and_dedup(entries);

        if entries.is_empty() {
            if satisfied > 0 && satisfied == specs.len() {
                return Ok(InstallPlan {
                    entries,
                    reason: PlanReason::AlreadyInstalled,
                });
            }
            return Err(Error::NoPackagesToInstall);
        }

        Ok(InstallPlan {
            entries,
            reason: PlanReason::Ready,
        })
    }

    /// Mode for an explicitly requested package.
    fn classify_target(&self, pkg: &Arc<Package>, opts: &InstallOptions) -> Mode {
        if opts.update {
            Mode::UPDATE
        } else if self
            .installed
            .contains_name_version(pkg.name(), pkg.version())
        {
            Mode::UPDATE
        } else {
            Mode::INSTALL
        }
    }

    /// Mode for a dependency pulled in by resolution; `None` means the
    /// dependency is already satisfied and is dropped from the plan.
    fn classify_dependency(&self, pkg: &Arc<Package>, opts: &InstallOptions) -> Option<Mode> {
        if self
            .installed
            .contains_exact(pkg.name(), pkg.version(), pkg.release())
        {
            return None;
        }
        if self
            .installed
            .contains_name_version(pkg.name(), pkg.version())
        {
            return Some(Mode::UPDATE);
        }
        if !self.installed.contains_name(pkg.name()) {
            return Some(if opts.update { Mode::UPDATE } else { Mode::INSTALL });
        }
        // installed at some other version: the update planner's business
        None
    }

    /// Build the update plan from the installed snapshot.
    ///
    /// With `lenient`, installed packages that no longer resolve in any
    /// repository are skipped with a warning instead of failing the run
    /// (used by check-only reporting).
    pub fn plan_update(&self, mode: UpdateMode, lenient: bool) -> Result<UpdatePlan> {
        // group by (name, version), keep the newest release per group
        let mut groups: BTreeMap<(String, String), Vec<Nevra>> = BTreeMap::new();
        for (name, version, release) in self.installed.iter() {
            groups
                .entry((name.clone(), version.clone()))
                .or_default()
                .push(Nevra::new(name, version, release, ""));
        }

        let mut actions = Vec::new();
        for ((name, _version), mut instances) in groups {
            instances.sort_by(rpm_cmp);
            let newest = instances.pop().expect("non-empty group");

            let available = match self.client.find_latest_provider(&name, "", "") {
                Ok(p) => p,
                Err(e) => {
                    if lenient {
                        warn!("{name}: not available in any repository: {e}");
                        continue;
                    }
                    return Err(e);
                }
            };

            if !rpm_less_than(&newest, available.nevra()) {
                continue;
            }

            let kind = if newest.version == available.version() {
                UpdateKind::Update
            } else {
                UpdateKind::Upgrade
            };

            // the self-package is processed whenever it lags, whatever
            // the mode; everything else needs upgrade mode for a
            // version bump
            if kind == UpdateKind::Upgrade && mode == UpdateMode::Update && name != SELF_PACKAGE {
                debug!(
                    "{}: version bump {} -> {} needs upgrade mode, skipping",
                    name,
                    newest.version,
                    available.version()
                );
                continue;
            }

            actions.push(UpdateAction {
                installed: newest,
                available,
                kind,
            });
        }

        // self-package first; everything else keeps its grouped order
        actions.sort_by_key(|a| a.installed.name != SELF_PACKAGE);
        Ok(UpdatePlan { actions })
    }
}

/// Deduplicate plan entries by RPM filename and hoist the self-package
/// to the front. The first occurrence of a filename wins.
fn hoist_and_dedup(entries: Vec<PlanEntry>) -> Vec<PlanEntry> {
    let mut seen = HashSet::new();
    let mut self_entry: Option<PlanEntry> = None;
    let mut rest = Vec::new();

    for entry in entries {
        if !seen.insert(entry.package.rpm_file_name()) {
            continue;
        }
        if entry.package.name() == SELF_PACKAGE && self_entry.is_none() {
            self_entry = Some(entry);
        } else {
            rest.push(entry);
        }
    }

    let mut out = Vec::with_capacity(rest.len() + 1);
    if let Some(entry) = self_entry {
        out.push(entry);
    }
    out.extend(rest);
    out
}
