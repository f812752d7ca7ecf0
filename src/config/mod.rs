// src/config/mod.rs

//! Deployment profiles and repository configuration files.
//!
//! A profile is pure data: default site root, default repository URLs,
//! and the path-relocation table handed to the RPM driver. Repository
//! identities live in `etc/yum.repos.d/*.repo` INI files under the site
//! root; this module reads and writes them.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the default site root.
pub const SITEROOT_ENV: &str = "MYSITEROOT";

/// Environment variable naming the default platform for project
/// installs (e.g. `x86_64-slc6-gcc48-opt`).
pub const PLATFORM_ENV: &str = "CMTCONFIG";

/// A deployment dialect: where software lands by default, which
/// repositories feed it, and how baked-in prefixes relocate.
#[derive(Debug)]
pub struct Profile {
    pub name: &'static str,
    pub default_siteroot: &'static str,
    /// (repository name, base URL) pairs written on first run.
    pub repos: &'static [(&'static str, &'static str)],
    /// (baked-in prefix, site-root-relative target) pairs; an empty
    /// target maps the prefix to the site root itself. Longest prefixes
    /// first.
    relocation_table: &'static [(&'static str, &'static str)],
}

/// Known deployment profiles.
pub static PROFILES: &[Profile] = &[
    Profile {
        name: "lhcb",
        default_siteroot: "/opt/LHCbSoft",
        repos: &[
            ("lcg", "http://cern.ch/service-spi/external/rpms/lcg"),
            ("lhcb", "http://cern.ch/lhcbproject/dist/rpm/lhcb"),
            ("lhcbext", "http://cern.ch/lhcbproject/dist/rpm/lcg"),
            ("lhcbincubator", "http://cern.ch/lhcbproject/dist/rpm/incubator"),
        ],
        relocation_table: &[
            ("/opt/lcg/external", "lcg/external"),
            ("/opt/lcg", "lcg/releases"),
            ("/opt/LHCbSoft", ""),
        ],
    },
    Profile {
        name: "atlas",
        default_siteroot: "/opt/atlas",
        repos: &[(
            "atlas",
            "http://atlas-computing.web.cern.ch/atlas-computing/links/reposDirectory/lcg/slc6/yum",
        )],
        relocation_table: &[("/opt/lcg", "lcg/releases"), ("/opt/atlas", "")],
    },
];

impl Profile {
    /// Look up a profile by name.
    pub fn named(name: &str) -> Result<&'static Profile> {
        PROFILES
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::ConfigError(format!("unknown profile {name:?}")))
    }

    /// Concrete relocation pairs for a site root.
    pub fn relocations(&self, siteroot: &Path) -> Vec<(String, String)> {
        self.relocation_table
            .iter()
            .map(|(from, rel)| {
                let to = if rel.is_empty() {
                    siteroot.to_path_buf()
                } else {
                    siteroot.join(rel)
                };
                (from.to_string(), to.display().to_string())
            })
            .collect()
    }

    /// Resolve the effective site root: explicit flag, then
    /// `$MYSITEROOT` (first path-list entry), then the profile default.
    pub fn resolve_siteroot(&self, explicit: Option<&str>) -> PathBuf {
        if let Some(root) = explicit.filter(|s| !s.is_empty()) {
            return PathBuf::from(root);
        }
        if let Ok(env_root) = std::env::var(SITEROOT_ENV) {
            if let Some(first) = env_root.split(':').next().filter(|s| !s.is_empty()) {
                return PathBuf::from(first);
            }
        }
        PathBuf::from(self.default_siteroot)
    }
}

/// One repository identity from a `.repo` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    pub name: String,
    pub baseurl: String,
    pub enabled: bool,
}

/// Parse a `.repo` INI document.
///
/// Every section is a repository; `name` and `baseurl` are required,
/// `enabled` defaults to true.
pub fn parse_repo_file(content: &str, origin: &str) -> Result<Vec<RepoConfig>> {
    let mut repos = Vec::new();
    let mut section: Option<String> = None;
    let mut baseurl: Option<String> = None;
    let mut name_key: Option<String> = None;
    let mut enabled = true;

    let mut flush = |section: &Option<String>,
                     name_key: &Option<String>,
                     baseurl: &Option<String>,
                     enabled: bool,
                     repos: &mut Vec<RepoConfig>|
     -> Result<()> {
        if let Some(id) = section {
            let name = name_key.clone().unwrap_or_else(|| id.clone());
            let baseurl = baseurl.clone().ok_or_else(|| {
                Error::ConfigError(format!("{origin}: repository {id:?} has no baseurl"))
            })?;
            repos.push(RepoConfig {
                name,
                baseurl,
                enabled,
            });
        }
        Ok(())
    };

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            flush(&section, &name_key, &baseurl, enabled, &mut repos)?;
            section = Some(header.trim().to_string());
            baseurl = None;
            name_key = None;
            enabled = true;
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::ConfigError(format!(
                "{origin}: malformed line {line:?}"
            )));
        };
        match key.trim() {
            "name" => name_key = Some(value.trim().to_string()),
            "baseurl" => baseurl = Some(value.trim().to_string()),
            "enabled" => {
                enabled = matches!(value.trim(), "1" | "true" | "yes");
            }
            _ => {}
        }
    }
    flush(&section, &name_key, &baseurl, enabled, &mut repos)?;
    Ok(repos)
}

/// Read every `.repo` file of a `yum.repos.d` directory, sorted by
/// filename.
pub fn read_repos_dir(dir: &Path) -> Result<Vec<RepoConfig>> {
    if !dir.exists() {
        return Err(Error::ConfigError(format!(
            "repository config directory {} does not exist",
            dir.display()
        )));
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::ConfigError(format!("read {}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|ext| ext == "repo").unwrap_or(false))
        .collect();
    paths.sort();

    let mut repos = Vec::new();
    for path in paths {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("read {}: {e}", path.display())))?;
        repos.extend(parse_repo_file(&content, &path.display().to_string())?);
    }
    debug!("read {} repository configs from {}", repos.len(), dir.display());
    Ok(repos)
}

/// Write one repository's `.repo` file into `dir`.
pub fn write_repo_file(dir: &Path, repo: &RepoConfig) -> Result<PathBuf> {
    let path = dir.join(format!("{}.repo", repo.name));
    let mut file = fs::File::create(&path)
        .map_err(|e| Error::IoError(format!("create {}: {e}", path.display())))?;
    write!(
        file,
        "[{name}]\n#REPOVERSION 0001\nname={name}\nbaseurl={url}\nenabled={enabled}\n",
        name = repo.name,
        url = repo.baseurl,
        enabled = if repo.enabled { 1 } else { 0 },
    )
    .map_err(|e| Error::IoError(format!("write {}: {e}", path.display())))?;
    file.sync_all()
        .map_err(|e| Error::IoError(format!("sync {}: {e}", path.display())))?;
    Ok(path)
}

/// Write the generated `yum.conf` for a site root.
pub fn write_yum_conf(path: &Path, siteroot: &Path) -> Result<()> {
    let mut file = fs::File::create(path)
        .map_err(|e| Error::IoError(format!("create {}: {e}", path.display())))?;
    write!(
        file,
        "[main]\n\
         #CONFVERSION 0001\n\
         cachedir=/var/cache/yum\n\
         debuglevel=2\n\
         logfile=/var/log/yum.log\n\
         pkgpolicy=newest\n\
         distroverpkg=redhat-release\n\
         tolerant=1\n\
         exactarch=1\n\
         obsoletes=1\n\
         plugins=1\n\
         gpgcheck=0\n\
         installroot={}\n\
         reposdir=/etc/yum.repos.d\n",
        siteroot.display()
    )
    .map_err(|e| Error::IoError(format!("write {}: {e}", path.display())))?;
    file.sync_all()
        .map_err(|e| Error::IoError(format!("sync {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_profile_lookup() {
        assert_eq!(Profile::named("lhcb").unwrap().name, "lhcb");
        assert_eq!(Profile::named("atlas").unwrap().name, "atlas");
        assert!(Profile::named("debian").is_err());
    }

    #[test]
    fn test_profile_relocations() {
        let profile = Profile::named("lhcb").unwrap();
        let pairs = profile.relocations(Path::new("/site"));
        assert_eq!(
            pairs,
            vec![
                ("/opt/lcg/external".to_string(), "/site/lcg/external".to_string()),
                ("/opt/lcg".to_string(), "/site/lcg/releases".to_string()),
                ("/opt/LHCbSoft".to_string(), "/site".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_repo_file() {
        let content = r#"
[lhcb]
#REPOVERSION 0001
name=lhcb
baseurl=http://cern.ch/lhcbproject/dist/rpm/lhcb
enabled=1

[lhcbext]
name=lhcbext
baseurl=http://cern.ch/lhcbproject/dist/rpm/lcg
enabled=0
"#;
        let repos = parse_repo_file(content, "test").unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "lhcb");
        assert!(repos[0].enabled);
        assert!(!repos[1].enabled);
    }

    #[test]
    fn test_parse_repo_file_defaults_enabled() {
        let repos = parse_repo_file("[r]\nbaseurl=file:///x\n", "test").unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "r");
        assert!(repos[0].enabled);
    }

    #[test]
    fn test_parse_repo_file_requires_baseurl() {
        let err = parse_repo_file("[r]\nname=r\n", "test").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_repo_file_round_trip() {
        let dir = tempdir().unwrap();
        let cfg = RepoConfig {
            name: "lcg".to_string(),
            baseurl: "http://cern.ch/service-spi/external/rpms/lcg".to_string(),
            enabled: true,
        };
        write_repo_file(dir.path(), &cfg).unwrap();
        let read = read_repos_dir(dir.path()).unwrap();
        assert_eq!(read, vec![cfg]);
    }

    #[test]
    fn test_read_repos_dir_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.repo"), "[b]\nbaseurl=file:///b\n").unwrap();
        fs::write(dir.path().join("a.repo"), "[a]\nbaseurl=file:///a\n").unwrap();
        fs::write(dir.path().join("ignore.txt"), "not a repo").unwrap();

        let repos = read_repos_dir(dir.path()).unwrap();
        let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_yum_conf_contains_installroot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("yum.conf");
        write_yum_conf(&path, Path::new("/site")).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("installroot=/site"));
        assert!(content.contains("reposdir=/etc/yum.repos.d"));
    }
}
