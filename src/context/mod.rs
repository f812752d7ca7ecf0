// src/context/mod.rs

//! Context: wires the site root, repositories, planner, downloader, and
//! RPM driver together behind the operations the CLI exposes.
//!
//! Construction lays out the site root (database directory, yum config,
//! cache, staging), installs the signal handler, initializes the RPM
//! database, and loads every configured repository.

pub mod signal;

use crate::config::{self, Profile, RepoConfig};
use crate::download::Downloader;
use crate::driver::{ProcessRegistry, RpmDriver};
use crate::error::{Error, Result};
use crate::planner::{
    InstallOptions, InstallPlan, InstalledSet, PlanReason, Planner, RpmSpec, UpdateAction,
    UpdateKind, UpdateMode, UpdatePlan,
};
use crate::repository::{Client, DEFAULT_BACKENDS};
use crate::resolver::{default_denylist, Resolver};
use crate::rpm::{rpm_cmp, Nevra, Package};
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Options fixed at context construction.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Profile name (`lhcb`, `atlas`).
    pub profile: String,
    /// Explicit site root; falls back to `$MYSITEROOT`, then the
    /// profile default.
    pub siteroot: Option<String>,
    /// Show what would happen without touching the driver database.
    pub dry_run: bool,
    /// Update the database but leave the filesystem alone.
    pub just_db: bool,
    /// Skip the remote staleness check and use cached metadata only.
    pub local_only: bool,
}

/// Wired-up installer state for one site root.
pub struct Context {
    siteroot: PathBuf,
    yumreposd: PathBuf,
    cachedir: PathBuf,
    tmpdir: PathBuf,
    client: Client,
    driver: RpmDriver,
    dry_run: bool,
    installed: OnceLock<InstalledSet>,
}

impl Context {
    pub fn new(opts: ContextOptions) -> Result<Self> {
        let profile = Profile::named(&opts.profile)?;
        let siteroot = profile.resolve_siteroot(opts.siteroot.as_deref());

        let dbpath = siteroot.join("var/lib/rpm");
        let etcdir = siteroot.join("etc");
        let yumconf = etcdir.join("yum.conf");
        let yumreposd = etcdir.join("yum.repos.d");
        let cachedir = siteroot.join("var/cache/lbyum");
        let tmpdir = siteroot.join("tmp");
        let bindir = siteroot.join("usr/bin");
        let libdir = siteroot.join("lib");
        let initfile = etcdir.join("repoinit");

        for dir in [
            &siteroot, &dbpath, &etcdir, &yumreposd, &cachedir, &tmpdir, &bindir, &libdir,
        ] {
            fs::create_dir_all(dir)
                .map_err(|e| Error::IoError(format!("create {}: {e}", dir.display())))?;
        }

        let path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{path}:{}", bindir.display()));

        let registry = ProcessRegistry::new();
        signal::install(Arc::clone(&registry));

        if !RpmDriver::is_available() {
            return Err(Error::ConfigError(
                "missing external tool: rpm".to_string(),
            ));
        }

        let driver = RpmDriver::new(&dbpath, profile.relocations(&siteroot), registry)
            .with_dry_run(opts.dry_run)
            .with_just_db(opts.just_db);
        driver.init_db()?;

        if !yumconf.exists() {
            config::write_yum_conf(&yumconf, &siteroot)?;
        }
        for (name, url) in profile.repos {
            let repo_file = yumreposd.join(format!("{name}.repo"));
            if !repo_file.exists() {
                config::write_repo_file(
                    &yumreposd,
                    &RepoConfig {
                        name: name.to_string(),
                        baseurl: url.to_string(),
                        enabled: true,
                    },
                )?;
            }
        }
        if !initfile.exists() {
            fs::write(&initfile, format!("{}\n", Utc::now().to_rfc3339()))
                .map_err(|e| Error::IoError(format!("write {}: {e}", initfile.display())))?;
        }

        let configs = config::read_repos_dir(&yumreposd)?;
        let client = Client::open(
            &configs,
            &cachedir,
            DEFAULT_BACKENDS,
            !opts.local_only,
            Arc::new(default_denylist()),
        )?;

        Ok(Self {
            siteroot,
            yumreposd,
            cachedir,
            tmpdir,
            client,
            driver,
            dry_run: opts.dry_run,
            installed: OnceLock::new(),
        })
    }

    pub fn siteroot(&self) -> &Path {
        &self.siteroot
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Complete installed-set snapshot, queried once per process.
    fn installed_set(&self) -> Result<&InstalledSet> {
        if let Some(set) = self.installed.get() {
            return Ok(set);
        }
        let triples = self.driver.query_installed()?;
        let _ = self.installed.set(InstalledSet::new(triples));
        Ok(self.installed.get().expect("just set"))
    }

    /// Install the given specs with their dependencies.
    pub fn install(&self, specs: &[RpmSpec], opts: &InstallOptions) -> Result<()> {
        let installed = self.installed_set()?;
        let resolver = Resolver::new(&self.client, default_denylist());
        let planner = Planner::new(&self.client, &resolver, installed);

        let plan = planner.plan_install(specs, opts)?;
        if plan.is_empty() && plan.reason == PlanReason::AlreadyInstalled {
            info!("all packages already installed");
            return Ok(());
        }
        self.describe_plan(&plan);

        if self.dry_run {
            info!("no RPM installed (dry-run)");
            return Ok(());
        }

        let packages: Vec<Arc<Package>> =
            plan.entries.iter().map(|e| Arc::clone(&e.package)).collect();
        let downloader = Downloader::new(&self.tmpdir, &self.driver);
        downloader.download(&packages)?;

        self.apply_plan(&plan)
    }

    /// Install a whole project from the repositories.
    ///
    /// Project RPMs are named `<project>_<version>_<platform>` (the
    /// platform's dashes flattened to underscores), next to a
    /// platform-less glue package `<project>_<version>`. `platforms` is
    /// a comma-separated list of regexes selecting the platform
    /// variants; empty falls back to `$CMTCONFIG`, and `all` accepts
    /// every platform.
    pub fn install_project(
        &self,
        project: &str,
        version: &str,
        release: &str,
        platforms: &str,
        opts: &InstallOptions,
    ) -> Result<()> {
        let prefix = if version.is_empty() {
            project.to_string()
        } else {
            format!("{project}_{version}")
        };
        let filters = platform_filters(platforms)?;

        let candidates =
            self.client
                .list_packages(&format!("^{}", regex::escape(&prefix)), "", release)?;

        let mut specs = Vec::new();
        for pkg in candidates {
            let keep = if pkg.name() == prefix {
                true
            } else {
                // a platform variant: everything after `<prefix>_`
                match pkg
                    .name()
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_prefix('_'))
                {
                    Some(platform) => match &filters {
                        Some(res) => res.iter().any(|re| re.is_match(platform)),
                        None => true,
                    },
                    None => false,
                }
            };
            if keep {
                specs.push(RpmSpec::new(pkg.name(), pkg.version(), pkg.release()));
            }
        }

        if specs.is_empty() {
            return Err(Error::NotFound(format!(
                "no RPMs for project {project} {version}"
            )));
        }
        info!(
            "installing project {project} {version} ({} RPMs)",
            specs.len()
        );
        self.install(&specs, opts)
    }

    /// Check for or apply available updates.
    pub fn update(&self, mode: UpdateMode, check_only: bool) -> Result<()> {
        let check_only = check_only || self.dry_run;
        let installed = self.installed_set()?;
        let resolver = Resolver::new(&self.client, default_denylist());
        let planner = Planner::new(&self.client, &resolver, installed);

        let plan = planner.plan_update(mode, check_only)?;
        if check_only {
            self.report_updates(&plan);
            return Ok(());
        }
        if plan.is_empty() {
            info!("packages updated: 0");
            return Ok(());
        }

        // The installer itself goes first, alone. If it was the only
        // pending action the rest of the run is a no-op success.
        if let Some(action) = plan.self_action() {
            info!(
                "updating {} to {}",
                action.installed.rpm_name(),
                action.available.rpm_name()
            );
            self.apply_update_action(action, true)?;
        }

        let mut applied = if plan.self_action().is_some() { 1 } else { 0 };
        for action in plan.rest() {
            info!(
                "updating {} to {}",
                action.installed.rpm_name(),
                action.available.rpm_name()
            );
            self.apply_update_action(action, false)?;
            applied += 1;
        }
        info!("packages updated: {applied}");
        Ok(())
    }

    fn apply_update_action(&self, action: &UpdateAction, force: bool) -> Result<()> {
        let pkg = &action.available;
        let downloader = Downloader::new(&self.tmpdir, &self.driver);
        let files = downloader.download(std::slice::from_ref(pkg))?;
        self.driver.install(&files, true, force)
    }

    fn report_updates(&self, plan: &UpdatePlan) {
        for action in &plan.actions {
            let verb = match action.kind {
                UpdateKind::Update => "updated",
                UpdateKind::Upgrade => "upgraded",
            };
            info!(
                "{} could be {} to {}",
                action.installed.rpm_name(),
                verb,
                action.available.rpm_name()
            );
        }
        info!("packages to update: {}", plan.actions.len());
    }

    fn describe_plan(&self, plan: &InstallPlan) {
        let mut names: Vec<String> = plan
            .entries
            .iter()
            .map(|e| e.package.rpm_name())
            .collect();
        names.sort();
        info!("found {} RPMs to install:", names.len());
        for (i, name) in names.iter().enumerate() {
            info!("\t[{:03}/{:03}] {}", i + 1, names.len(), name);
        }
    }

    fn apply_plan(&self, plan: &InstallPlan) -> Result<()> {
        // self-package first, then updates, then installs
        if let Some(entry) = plan.self_entry() {
            let file = self.tmpdir.join(entry.package.rpm_file_name());
            self.driver
                .install(&[file], entry.mode.is_update_like(), true)?;
        }

        let update_files: Vec<PathBuf> = plan
            .update_batch()
            .iter()
            .map(|e| self.tmpdir.join(e.package.rpm_file_name()))
            .collect();
        let update_force = plan.update_batch().iter().any(|e| e.force);
        self.driver.install(&update_files, true, update_force)?;

        let install_files: Vec<PathBuf> = plan
            .install_batch()
            .iter()
            .map(|e| self.tmpdir.join(e.package.rpm_file_name()))
            .collect();
        let install_force = plan.install_batch().iter().any(|e| e.force);
        self.driver.install(&install_files, false, install_force)?;

        info!("installed {} RPMs", plan.entries.len());
        Ok(())
    }

    /// Remove installed packages, then report dependencies nothing
    /// still requires.
    pub fn remove(&self, specs: &[RpmSpec], force: bool) -> Result<()> {
        let mut names = Vec::new();
        let mut freed_requires = Vec::new();

        for spec in specs {
            let pkg = self
                .client
                .find_latest_provider(&spec.name, &spec.version, &spec.release)?;
            freed_requires.extend(pkg.requires().to_vec());
            names.push(pkg.name().to_string());
        }

        self.driver.remove(&names, force)?;

        if !freed_requires.is_empty() && !self.dry_run {
            self.report_orphans(&names, &freed_requires)?;
        }
        Ok(())
    }

    /// After a removal, list previously-required packages that no
    /// remaining installed package requires.
    fn report_orphans(
        &self,
        removed: &[String],
        freed: &[crate::rpm::Requires],
    ) -> Result<()> {
        let installed = self.driver.query_installed()?;

        let mut still_required: BTreeSet<String> = BTreeSet::new();
        for (name, version, release) in &installed {
            let Ok(pkg) = self.client.find_latest_provider(name, version, release) else {
                continue;
            };
            for req in pkg.requires() {
                if let Ok(provider) = self.client.find_latest_by_require(req) {
                    still_required.insert(provider.id());
                }
            }
        }

        let mut orphans = BTreeSet::new();
        for req in freed {
            let Ok(pkg) = self.client.find_latest_by_require(req) else {
                continue;
            };
            if removed.contains(&pkg.name().to_string()) {
                continue;
            }
            if !still_required.contains(&pkg.id()) {
                orphans.insert(pkg.id());
            }
        }

        if !orphans.is_empty() {
            let list: Vec<String> = orphans.into_iter().collect();
            info!("packages no longer required: {}", list.join(" "));
        }
        Ok(())
    }

    /// List repository packages matching the given patterns.
    pub fn list(&self, name: &str, version: &str, release: &str) -> Result<Vec<Arc<Package>>> {
        let pkgs = self.client.list_packages(name, version, release)?;
        for pkg in &pkgs {
            println!("{}", pkg.id());
        }
        info!("Total matching: {}", pkgs.len());
        Ok(pkgs)
    }

    /// List installed packages matching the given patterns.
    pub fn list_installed(
        &self,
        name: &str,
        version: &str,
        release: &str,
    ) -> Result<Vec<Nevra>> {
        let name_re = optional_regex(name)?;
        let version_re = optional_regex(version)?;
        let release_re = optional_regex(release)?;
        let matches = |re: &Option<Regex>, s: &str| re.as_ref().map(|r| r.is_match(s)).unwrap_or(true);

        let installed = self.installed_set()?;
        let mut out: Vec<Nevra> = installed
            .iter()
            .filter(|(n, v, r)| {
                matches(&name_re, n) && matches(&version_re, v) && matches(&release_re, r)
            })
            .map(|(n, v, r)| Nevra::new(n, v, r, ""))
            .collect();
        out.sort_by(rpm_cmp);

        if out.is_empty() {
            println!("** No Match found **");
            return Ok(out);
        }
        for nevra in &out {
            println!("{}", nevra.id());
        }
        Ok(out)
    }

    /// List the dependencies of the latest package matching the triple.
    pub fn list_deps(&self, name: &str, version: &str, release: &str) -> Result<Vec<Arc<Package>>> {
        let pkg = self
            .client
            .find_latest_provider(name, version, release)
            .map_err(|e| {
                Error::NotFound(format!(
                    "no such package name={name:?} version={version:?} release={release:?} ({e})"
                ))
            })?;

        let resolver = Resolver::new(&self.client, default_denylist());
        let mut deps = resolver.package_deps(&pkg).into_result()?;
        deps.sort_by(|a, b| rpm_cmp(a.nevra(), b.nevra()));
        for dep in &deps {
            println!("{}", dep.id());
        }
        Ok(deps)
    }

    /// Emit the dependency graph of matching packages in DOT form.
    /// Resolution failures are tolerated; the partial graph is still
    /// useful for diagnostics.
    pub fn dep_graph(&self, name: &str, version: &str, release: &str) -> Result<String> {
        let pkgs = self.client.list_packages(name, version, release)?;
        let resolver = Resolver::new(&self.client, default_denylist());

        let mut edges: BTreeSet<(String, String)> = BTreeSet::new();
        for pkg in &pkgs {
            let resolution = resolver.package_deps(pkg);
            if let Some(e) = resolution.error {
                warn!("{}: partial dependency graph: {e}", pkg.rpm_name());
            }
            for dep in resolution.packages {
                edges.insert((pkg.name().to_string(), dep.name().to_string()));
            }
        }

        let mut dot = String::from("digraph deps {\n");
        for (from, to) in &edges {
            dot.push_str(&format!("    \"{from}\" -> \"{to}\";\n"));
        }
        dot.push_str("}\n");
        Ok(dot)
    }

    /// List installed packages providing a file matching `pattern`.
    pub fn provides(&self, pattern: &str) -> Result<Vec<(String, String)>> {
        let file_re = Regex::new(pattern)
            .map_err(|e| Error::ConfigError(format!("bad pattern {pattern:?}: {e}")))?;

        let installed = self.installed_set()?;
        let mut results = Vec::new();

        for (name, version, release) in installed.iter() {
            let pkg = self.client.find_latest_provider(name, version, release)?;
            let rpm_file = self.tmpdir.join(pkg.rpm_file_name());
            if !rpm_file.exists() {
                return Err(Error::NotFound(format!(
                    "no such file {}",
                    rpm_file.display()
                )));
            }
            // list_files rewrites paths through the relocation table
            for file in self.driver.list_files(&rpm_file)? {
                if file_re.is_match(&file) {
                    results.push((pkg.id(), file));
                    break;
                }
            }
        }

        if results.is_empty() {
            println!("** No Match found **");
            return Ok(results);
        }
        results.sort();
        for (id, file) in &results {
            println!("{id} ({file})");
        }
        Ok(results)
    }

    /// Pass raw arguments to the RPM driver.
    pub fn rpm(&self, args: &[String]) -> Result<()> {
        self.driver.passthrough(args)
    }

    /// Add a repository config and reload it.
    pub fn repo_add(&mut self, name: &str, url: &str) -> Result<()> {
        let cfg = RepoConfig {
            name: name.to_string(),
            baseurl: url.to_string(),
            enabled: true,
        };
        config::write_repo_file(&self.yumreposd, &cfg)?;
        info!("added repository {name} ({url})");

        let repo = crate::repository::Repository::open(
            name,
            url,
            &self.cachedir.join(name),
            DEFAULT_BACKENDS,
            true,
            Arc::new(default_denylist()),
        )?;
        self.client.add_repository(repo);
        Ok(())
    }

    /// Remove a repository config file.
    pub fn repo_rm(&mut self, name: &str) -> Result<()> {
        let path = self.yumreposd.join(format!("{name}.repo"));
        if !path.exists() {
            return Err(Error::NotFound(format!("no repository {name:?}")));
        }
        fs::remove_file(&path)
            .map_err(|e| Error::IoError(format!("remove {}: {e}", path.display())))?;
        info!("removed repository {name}");
        Ok(())
    }

    /// List configured repositories.
    pub fn repo_ls(&self) -> Result<Vec<RepoConfig>> {
        let repos = config::read_repos_dir(&self.yumreposd)?;
        for repo in &repos {
            println!(
                "{}\t{}\t{}",
                repo.name,
                repo.baseurl,
                if repo.enabled { "enabled" } else { "disabled" }
            );
        }
        Ok(repos)
    }

    /// Release repository resources.
    pub fn close(&mut self) {
        debug!("closing context for {}", self.siteroot.display());
        self.client.close();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close();
    }
}

fn optional_regex(pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| Error::ConfigError(format!("bad pattern {pattern:?}: {e}")))
}

/// Compile the project-install platform filters. `None` means every
/// platform is accepted.
fn platform_filters(platforms: &str) -> Result<Option<Vec<Regex>>> {
    let requested = if platforms.is_empty() {
        std::env::var(config::PLATFORM_ENV).unwrap_or_default()
    } else {
        platforms.to_string()
    };
    if requested.is_empty() || requested == "all" {
        return Ok(None);
    }

    let mut filters = Vec::new();
    for part in requested.split(',').filter(|s| !s.is_empty()) {
        // RPM names carry platforms with dashes flattened to underscores
        let pattern = part.replace('-', "_");
        filters.push(Regex::new(&pattern).map_err(|e| {
            Error::ConfigError(format!("bad platform pattern {part:?}: {e}"))
        })?);
    }
    Ok(if filters.is_empty() { None } else { Some(filters) })
}
