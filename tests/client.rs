// tests/client.rs

//! Cross-repo lookup scenarios against synthetic fixture repositories.

mod common;

use common::{lookup_fixture, multi_repo_client, pkg, single_repo_client};
use sitepkr::rpm::{ReqFlag, Requires};

#[test]
fn find_latest_by_require_exact_version() {
    let (_dir, client) = single_repo_client(&lookup_fixture());

    let req = Requires::new("TestPackage", "1.0.0", "1", "", ReqFlag::Eq, "");
    let pkg = client.find_latest_by_require(&req).unwrap();
    assert_eq!(pkg.version(), "1.0.0");
    assert_eq!(pkg.release(), "1");
}

#[test]
fn find_latest_by_name_picks_newest_release() {
    let (_dir, client) = single_repo_client(&lookup_fixture());

    let pkg = client.find_latest_by_name("TP2", "1.2.5", "").unwrap();
    assert_eq!(pkg.version(), "1.2.5");
    assert_eq!(pkg.release(), "2");
}

#[test]
fn find_latest_by_name_honors_release_pin() {
    let (_dir, client) = single_repo_client(&lookup_fixture());

    let pkg = client.find_latest_by_name("TP2", "1.2.5", "1").unwrap();
    assert_eq!(pkg.release(), "1");
}

#[test]
fn find_latest_by_name_without_version() {
    let (_dir, client) = single_repo_client(&lookup_fixture());

    let pkg = client.find_latest_by_name("TP2", "", "").unwrap();
    assert_eq!(pkg.version(), "1.2.5");
    assert_eq!(pkg.release(), "2");
}

#[test]
fn require_without_version_matches_overall_latest() {
    let (_dir, client) = single_repo_client(&lookup_fixture());

    let any = Requires::new("TPRel", "", "", "", ReqFlag::Eq, "");
    let found = client.find_latest_by_require(&any).unwrap();
    assert_eq!((found.version(), found.release()), ("4.2.8", "1"));

    let pinned = Requires::new("TPRel", "4.2.7", "", "", ReqFlag::Eq, "");
    let found = client.find_latest_by_require(&pinned).unwrap();
    assert_eq!((found.version(), found.release()), ("4.2.7", "2"));
}

#[test]
fn provider_satisfies_the_requirement_it_was_found_for() {
    let (_dir, client) = single_repo_client(&lookup_fixture());

    let req = Requires::new("TestPackage", "1.3.7", "", "", ReqFlag::Ge, "");
    let provider = client.find_latest_by_require(&req).unwrap();
    assert!(provider
        .provides()
        .iter()
        .any(|p| req.provide_matches(&p.nevra)));
}

#[test]
fn unknown_name_propagates_the_first_error() {
    let (_dir, client) = single_repo_client(&lookup_fixture());
    assert!(client.find_latest_by_name("NoSuchThing", "", "").is_err());

    let req = Requires::new("NoSuchCap", "", "", "", ReqFlag::Eq, "");
    assert!(matches!(
        client.find_latest_by_require(&req),
        Err(sitepkr::Error::NoProvider(_))
    ));
}

#[test]
fn cross_repo_lookup_returns_global_maximum() {
    let (_dir, client) = multi_repo_client(&[
        ("alpha", vec![pkg("tool", "2.0.0", "1")]),
        ("beta", vec![pkg("tool", "2.1.0", "1")]),
        ("gamma", vec![pkg("tool", "2.0.5", "7")]),
    ]);

    let found = client.find_latest_by_name("tool", "", "").unwrap();
    assert_eq!(found.version(), "2.1.0");
    assert_eq!(found.repository(), "beta");
}

#[test]
fn list_packages_filters_by_patterns() {
    let (_dir, client) = single_repo_client(&lookup_fixture());

    let all = client.list_packages("", "", "").unwrap();
    assert_eq!(all.len(), lookup_fixture().len());

    let tp = client.list_packages("^TP2$", "", "").unwrap();
    assert_eq!(tp.len(), 2);

    let pinned = client.list_packages("^TPRel$", "4\\.2\\.7", "").unwrap();
    assert_eq!(pinned.len(), 2);

    let release_one = client.list_packages("^TPRel$", "", "^1$").unwrap();
    assert_eq!(release_one.len(), 2);
}

#[test]
fn list_packages_is_sorted_by_nevra_order() {
    let (_dir, client) = single_repo_client(&lookup_fixture());
    let pkgs = client.list_packages("^TPRel$", "", "").unwrap();
    let ids: Vec<String> = pkgs.iter().map(|p| p.rpm_name()).collect();
    assert_eq!(
        ids,
        vec!["TPRel-4.2.7-1", "TPRel-4.2.7-2", "TPRel-4.2.8-1"]
    );
}

#[test]
fn package_url_joins_repo_and_location() {
    let (_dir, client) = single_repo_client(&lookup_fixture());
    let pkg = client.find_latest_by_name("TestPackage", "1.0.0", "").unwrap();
    assert!(pkg.url().starts_with("file://"));
    assert!(pkg.url().ends_with("/rpms/TestPackage-1.0.0-1.rpm"));
}
