// tests/planner.rs

//! Install- and update-planning scenarios against an injected
//! installed-set snapshot.

mod common;

use common::{pkg, single_repo_client, PkgDef};
use sitepkr::planner::{
    InstallOptions, InstalledSet, Mode, PlanReason, Planner, RpmSpec, UpdateKind, UpdateMode,
    SELF_PACKAGE,
};
use sitepkr::resolver::{default_denylist, Resolver};
use sitepkr::Error;

fn installed(triples: &[(&str, &str, &str)]) -> InstalledSet {
    InstalledSet::new(
        triples
            .iter()
            .map(|(n, v, r)| (n.to_string(), v.to_string(), r.to_string()))
            .collect(),
    )
}

fn fixture() -> Vec<PkgDef> {
    vec![
        pkg("gcc", "4.8.1", "1"),
        pkg("gcc", "4.8.1", "2"),
        pkg("AIDA", "1.0.0", "12").requires("gcc", "EQ", ""),
        pkg("AIDA", "1.0.0", "72").requires("gcc", "EQ", ""),
        pkg("CASTOR", "2.1.13", "72")
            .requires("gcc", "EQ", "")
            .requires("AIDA", "GE", "1.0.0"),
        pkg(SELF_PACKAGE, "0.1.20140701", "1"),
        pkg(SELF_PACKAGE, "0.1.20141113", "1"),
    ]
}

#[test]
fn fresh_install_plans_target_and_dependencies() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let empty = installed(&[]);
    let planner = Planner::new(&client, &resolver, &empty);

    let plan = planner
        .plan_install(&[RpmSpec::parse("AIDA")], &InstallOptions::default())
        .unwrap();

    assert_eq!(plan.reason, PlanReason::Ready);
    let mut names: Vec<String> = plan.entries.iter().map(|e| e.package.rpm_name()).collect();
    names.sort();
    assert_eq!(names, vec!["AIDA-1.0.0-72", "gcc-4.8.1-2"]);
    assert!(plan.entries.iter().all(|e| e.mode == Mode::INSTALL));
}

#[test]
fn release_bump_classifies_as_update() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let set = installed(&[("AIDA", "1.0.0", "12"), ("gcc", "4.8.1", "2")]);
    let planner = Planner::new(&client, &resolver, &set);

    // AIDA installed at release 12, repo has 72: same version, so the
    // target lands in the update batch; gcc is already exact.
    let plan = planner
        .plan_install(&[RpmSpec::parse("AIDA")], &InstallOptions::default())
        .unwrap();

    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].package.rpm_name(), "AIDA-1.0.0-72");
    assert_eq!(plan.entries[0].mode, Mode::UPDATE);
    assert_eq!(plan.update_batch().len(), 1);
    assert!(plan.install_batch().is_empty());
}

#[test]
fn satisfied_dependencies_are_filtered() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let set = installed(&[("gcc", "4.8.1", "2")]);
    let planner = Planner::new(&client, &resolver, &set);

    let plan = planner
        .plan_install(&[RpmSpec::parse("AIDA")], &InstallOptions::default())
        .unwrap();

    let names: Vec<&str> = plan.entries.iter().map(|e| e.package.name()).collect();
    assert_eq!(names, vec!["AIDA"]);
}

#[test]
fn overlapping_specs_deduplicate_by_filename() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let empty = installed(&[]);
    let planner = Planner::new(&client, &resolver, &empty);

    let plan = planner
        .plan_install(
            &[RpmSpec::parse("AIDA"), RpmSpec::parse("CASTOR")],
            &InstallOptions::default(),
        )
        .unwrap();

    let mut files: Vec<String> = plan
        .entries
        .iter()
        .map(|e| e.package.rpm_file_name())
        .collect();
    let total = files.len();
    files.sort();
    files.dedup();
    assert_eq!(files.len(), total, "duplicate filenames in plan");
    assert_eq!(total, 3); // AIDA, CASTOR, gcc
}

#[test]
fn plan_is_deterministic() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let empty = installed(&[]);
    let planner = Planner::new(&client, &resolver, &empty);

    let specs = [RpmSpec::parse("CASTOR"), RpmSpec::parse("AIDA")];
    let first: Vec<String> = planner
        .plan_install(&specs, &InstallOptions::default())
        .unwrap()
        .entries
        .iter()
        .map(|e| e.package.rpm_name())
        .collect();
    let second: Vec<String> = planner
        .plan_install(&specs, &InstallOptions::default())
        .unwrap()
        .entries
        .iter()
        .map(|e| e.package.rpm_name())
        .collect();
    assert_eq!(first, second);
}

#[test]
fn self_package_is_hoisted_and_forced() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let empty = installed(&[]);
    let planner = Planner::new(&client, &resolver, &empty);

    let plan = planner
        .plan_install(
            &[RpmSpec::parse("AIDA"), RpmSpec::parse(SELF_PACKAGE)],
            &InstallOptions::default(),
        )
        .unwrap();

    let first = &plan.entries[0];
    assert_eq!(first.package.name(), SELF_PACKAGE);
    assert!(first.force);
    assert!(plan.self_entry().is_some());
    // the self-package never drags dependencies along
    assert_eq!(plan.entries.len(), 3); // self + AIDA + gcc
}

#[test]
fn exact_install_is_a_noop_with_already_installed_reason() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let set = installed(&[("AIDA", "1.0.0", "72"), ("gcc", "4.8.1", "2")]);
    let planner = Planner::new(&client, &resolver, &set);

    let plan = planner
        .plan_install(&[RpmSpec::parse("AIDA-1.0.0-72")], &InstallOptions::default())
        .unwrap();

    assert!(plan.is_empty());
    assert_eq!(plan.reason, PlanReason::AlreadyInstalled);
}

#[test]
fn explicit_newer_install_over_installed_is_refused() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let set = installed(&[(SELF_PACKAGE, "0.1.20140701", "1")]);
    let planner = Planner::new(&client, &resolver, &set);

    // explicit newer version: refused
    let err = planner
        .plan_install(
            &[RpmSpec::parse(&format!("{SELF_PACKAGE}-0.1.20141113"))],
            &InstallOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InstallConflict { .. }));

    // bare name resolving to a newer version: refused the same way
    let err = planner
        .plan_install(&[RpmSpec::parse(SELF_PACKAGE)], &InstallOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::InstallConflict { .. }));
}

#[test]
fn update_then_removed_install_succeeds() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());

    // update accepts the self-package's version bump even in
    // release-only mode and puts it first
    let set = installed(&[(SELF_PACKAGE, "0.1.20140701", "1")]);
    let planner = Planner::new(&client, &resolver, &set);
    let update = planner.plan_update(UpdateMode::Update, false).unwrap();
    assert_eq!(update.actions.len(), 1);
    assert!(update.self_action().is_some());
    assert_eq!(
        update.actions[0].available.rpm_name(),
        format!("{SELF_PACKAGE}-0.1.20141113-1")
    );

    // after removal, the explicit install goes through
    let removed = installed(&[]);
    let planner = Planner::new(&client, &resolver, &removed);
    let plan = planner
        .plan_install(
            &[RpmSpec::parse(&format!("{SELF_PACKAGE}-0.1.20141113"))],
            &InstallOptions::default(),
        )
        .unwrap();
    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].package.version(), "0.1.20141113");
}

#[test]
fn update_mode_accepts_release_bumps_only() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let set = installed(&[
        ("AIDA", "1.0.0", "12"),    // release bump available (72)
        ("CASTOR", "2.1.13", "72"), // up to date
        ("gcc", "4.8.1", "2"),      // up to date
    ]);
    let planner = Planner::new(&client, &resolver, &set);

    let plan = planner.plan_update(UpdateMode::Update, false).unwrap();
    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].installed.rpm_name(), "AIDA-1.0.0-12");
    assert_eq!(plan.actions[0].kind, UpdateKind::Update);
}

#[test]
fn upgrade_mode_accepts_version_bumps() {
    let fixture = vec![
        pkg("lib", "1.0.0", "1"),
        pkg("lib", "1.1.0", "1"),
        pkg("tool", "2.0.0", "1"),
        pkg("tool", "2.0.0", "2"),
    ];
    let (_dir, client) = single_repo_client(&fixture);
    let resolver = Resolver::new(&client, default_denylist());
    let set = installed(&[("lib", "1.0.0", "1"), ("tool", "2.0.0", "1")]);
    let planner = Planner::new(&client, &resolver, &set);

    // release-only mode sees just the tool
    let update = planner.plan_update(UpdateMode::Update, false).unwrap();
    assert_eq!(update.actions.len(), 1);
    assert_eq!(update.actions[0].installed.name, "tool");

    // upgrade mode sees both, with the right classifications
    let upgrade = planner.plan_update(UpdateMode::Upgrade, false).unwrap();
    assert_eq!(upgrade.actions.len(), 2);
    let lib = upgrade
        .actions
        .iter()
        .find(|a| a.installed.name == "lib")
        .unwrap();
    assert_eq!(lib.kind, UpdateKind::Upgrade);
    assert_eq!(lib.available.version(), "1.1.0");
    let tool = upgrade
        .actions
        .iter()
        .find(|a| a.installed.name == "tool")
        .unwrap();
    assert_eq!(tool.kind, UpdateKind::Update);
}

#[test]
fn update_with_nothing_to_do_is_empty() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let set = installed(&[("CASTOR", "2.1.13", "72"), ("gcc", "4.8.1", "2")]);
    let planner = Planner::new(&client, &resolver, &set);

    let plan = planner.plan_update(UpdateMode::Upgrade, false).unwrap();
    assert!(plan.is_empty());
}

#[test]
fn update_groups_keep_newest_installed_release() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    // both releases installed; only the newest matters, and it is
    // already the repo maximum
    let set = installed(&[("gcc", "4.8.1", "1"), ("gcc", "4.8.1", "2")]);
    let planner = Planner::new(&client, &resolver, &set);

    let plan = planner.plan_update(UpdateMode::Upgrade, false).unwrap();
    assert!(plan.is_empty());
}

#[test]
fn lenient_update_skips_unresolvable_packages() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let set = installed(&[("homegrown", "0.1", "1"), ("AIDA", "1.0.0", "12")]);
    let planner = Planner::new(&client, &resolver, &set);

    // strict mode fails on the unknown package
    assert!(planner.plan_update(UpdateMode::Update, false).is_err());

    // lenient (check-only) mode reports what it can
    let plan = planner.plan_update(UpdateMode::Update, true).unwrap();
    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].installed.name, "AIDA");
}

#[test]
fn no_deps_plans_only_the_target() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let empty = installed(&[]);
    let planner = Planner::new(&client, &resolver, &empty);

    let plan = planner
        .plan_install(
            &[RpmSpec::parse("CASTOR")],
            &InstallOptions {
                no_deps: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].package.name(), "CASTOR");
}

#[test]
fn force_bypasses_the_overwrite_refusal() {
    let (_dir, client) = single_repo_client(&fixture());
    let resolver = Resolver::new(&client, default_denylist());
    let set = installed(&[("AIDA", "1.0.0", "12")]);
    let planner = Planner::new(&client, &resolver, &set);

    let plan = planner
        .plan_install(
            &[RpmSpec::parse("AIDA-1.0.0-72")],
            &InstallOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(plan.entries.iter().any(|e| e.package.name() == "AIDA"));
    assert!(plan.entries.iter().all(|e| e.force));
}
