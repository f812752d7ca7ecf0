// tests/common/mod.rs

//! Shared fixture builders: synthetic YUM repositories on disk,
//! loaded through the real repomd/backend machinery over file:// URLs.

#![allow(dead_code)]

use sitepkr::repository::{BackendKind, Client, Repository};
use sitepkr::resolver::default_denylist;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// One package definition for a fixture repository.
#[derive(Clone)]
pub struct PkgDef {
    pub name: String,
    pub version: String,
    pub release: String,
    requires: Vec<Entry>,
    extra_provides: Vec<Entry>,
}

#[derive(Clone)]
struct Entry {
    name: String,
    flags: String,
    version: String,
}

/// Start a package definition. Every package provides itself at its
/// exact version and release.
pub fn pkg(name: &str, version: &str, release: &str) -> PkgDef {
    PkgDef {
        name: name.to_string(),
        version: version.to_string(),
        release: release.to_string(),
        requires: Vec::new(),
        extra_provides: Vec::new(),
    }
}

impl PkgDef {
    /// Add a requirement. Empty version means "any".
    pub fn requires(mut self, name: &str, flags: &str, version: &str) -> Self {
        self.requires.push(Entry {
            name: name.to_string(),
            flags: flags.to_string(),
            version: version.to_string(),
        });
        self
    }

    /// Advertise an extra capability.
    pub fn provides(mut self, name: &str, version: &str) -> Self {
        self.extra_provides.push(Entry {
            name: name.to_string(),
            flags: "EQ".to_string(),
            version: version.to_string(),
        });
        self
    }

    pub fn rpm_file_name(&self) -> String {
        format!("{}-{}-{}.rpm", self.name, self.version, self.release)
    }
}

/// Render a `primary.xml` document for the given packages.
pub fn primary_xml(pkgs: &[PkgDef]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <metadata xmlns=\"http://linux.duke.edu/metadata/common\" \
         xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\" packages=\"0\">\n",
    );

    for p in pkgs {
        writeln!(xml, "  <package type=\"rpm\">").unwrap();
        writeln!(xml, "    <name>{}</name>", p.name).unwrap();
        writeln!(xml, "    <arch>noarch</arch>").unwrap();
        writeln!(
            xml,
            "    <version epoch=\"0\" ver=\"{}\" rel=\"{}\"/>",
            p.version, p.release
        )
        .unwrap();
        writeln!(
            xml,
            "    <location href=\"rpms/{}\"/>",
            p.rpm_file_name()
        )
        .unwrap();
        writeln!(xml, "    <format>").unwrap();
        writeln!(xml, "      <rpm:group>Test/Fixture</rpm:group>").unwrap();

        writeln!(xml, "      <rpm:provides>").unwrap();
        writeln!(
            xml,
            "        <rpm:entry name=\"{}\" flags=\"EQ\" epoch=\"0\" ver=\"{}\" rel=\"{}\"/>",
            p.name, p.version, p.release
        )
        .unwrap();
        for prov in &p.extra_provides {
            writeln!(
                xml,
                "        <rpm:entry name=\"{}\" flags=\"{}\" epoch=\"0\" ver=\"{}\"/>",
                prov.name, prov.flags, prov.version
            )
            .unwrap();
        }
        writeln!(xml, "      </rpm:provides>").unwrap();

        if !p.requires.is_empty() {
            writeln!(xml, "      <rpm:requires>").unwrap();
            for req in &p.requires {
                writeln!(
                    xml,
                    "        <rpm:entry name=\"{}\" flags=\"{}\" epoch=\"0\" ver=\"{}\"/>",
                    req.name, req.flags, req.version
                )
                .unwrap();
            }
            writeln!(xml, "      </rpm:requires>").unwrap();
        }

        writeln!(xml, "    </format>").unwrap();
        writeln!(xml, "  </package>").unwrap();
    }
    xml.push_str("</metadata>\n");
    xml
}

/// Write a complete fixture repository (repomd + gzipped primary +
/// artifact stand-ins) under `root`.
pub fn write_repo(root: &Path, pkgs: &[PkgDef]) {
    use sha2::{Digest, Sha256};

    let repodata = root.join("repodata");
    fs::create_dir_all(&repodata).unwrap();

    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(primary_xml(pkgs).as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();
    let digest = format!("{:x}", Sha256::digest(&compressed));
    fs::write(repodata.join("primary.xml.gz"), &compressed).unwrap();

    fs::write(
        repodata.join("repomd.xml"),
        format!(
            "<repomd>\n  <data type=\"primary\">\n    <checksum type=\"sha256\">{digest}</checksum>\n    <location href=\"repodata/primary.xml.gz\"/>\n    <timestamp>100.0</timestamp>\n  </data>\n</repomd>\n"
        ),
    )
    .unwrap();

    let rpms = root.join("rpms");
    fs::create_dir_all(&rpms).unwrap();
    for p in pkgs {
        fs::write(rpms.join(p.rpm_file_name()), format!("rpm:{}", p.name)).unwrap();
    }
}

/// Open one fixture repository through the real backend selection.
pub fn open_repo(name: &str, root: &Path, cache: &Path) -> Repository {
    Repository::open(
        name,
        &format!("file://{}", root.display()),
        cache,
        &[BackendKind::Xml],
        true,
        Arc::new(default_denylist()),
    )
    .unwrap()
}

/// A client over one synthetic repository.
///
/// Returns the backing TempDir (keep it alive) and the loaded client.
pub fn single_repo_client(pkgs: &[PkgDef]) -> (TempDir, Client) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("repo");
    write_repo(&root, pkgs);

    let mut client = Client::empty();
    client.add_repository(open_repo("testrepo", &root, &dir.path().join("cache")));
    (dir, client)
}

/// A client over several named repositories.
pub fn multi_repo_client(repos: &[(&str, Vec<PkgDef>)]) -> (TempDir, Client) {
    let dir = TempDir::new().unwrap();
    let mut client = Client::empty();
    for (name, pkgs) in repos {
        let root = dir.path().join(name);
        write_repo(&root, pkgs);
        client.add_repository(open_repo(name, &root, &dir.path().join("cache").join(name)));
    }
    (dir, client)
}

/// The standard fixture catalog used by the lookup scenarios.
pub fn lookup_fixture() -> Vec<PkgDef> {
    vec![
        pkg("TestPackage", "1.0.0", "1"),
        pkg("TestPackage", "1.3.7", "1"),
        pkg("TP2", "1.2.5", "1").requires("TestPackage", "GE", "1.3.7"),
        pkg("TP2", "1.2.5", "2").requires("TestPackage", "GE", "1.3.7"),
        pkg("TPRel", "4.2.7", "1"),
        pkg("TPRel", "4.2.7", "2"),
        pkg("TPRel", "4.2.8", "1"),
        pkg("TCyclicDep", "1.0.0", "1").requires("TCyclicDep2", "EQ", ""),
        pkg("TCyclicDep2", "1.0.0", "1").requires("TCyclicDep", "EQ", ""),
    ]
}
