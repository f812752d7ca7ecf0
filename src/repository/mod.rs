// src/repository/mod.rs

//! YUM repository access.
//!
//! A [`Repository`] pairs an identity (name, URL, cache directory) with
//! one loaded index backend. Backend selection walks the configured
//! kinds in priority order against the data types advertised by the
//! remote `repomd.xml`, refreshing the cached index when the remote
//! timestamp is strictly newer.

pub mod backend;
pub mod client;
pub mod fetch;
pub mod metadata;
pub mod sqlite;
pub mod xml;

pub use backend::{Backend, BackendKind, DEFAULT_BACKENDS};
pub use client::Client;
pub use metadata::{parse_repomd, RepomdData, RepomdTimestamp};
pub use sqlite::SqliteBackend;
pub use xml::XmlBackend;

use crate::error::{Error, Result};
use crate::rpm::{Package, Requires};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const REPOMD_NAME: &str = "repomd.xml";

/// One configured repository with its loaded backend.
pub struct Repository {
    name: String,
    repo_url: String,
    repomd_url: String,
    local_repomd: PathBuf,
    cache_dir: PathBuf,
    backend: Option<Box<dyn Backend>>,
}

impl Repository {
    /// Construct and load a repository.
    ///
    /// With `check_for_updates` the remote repomd is consulted and the
    /// index refreshed when stale; otherwise only already-cached data is
    /// considered (local-only mode).
    pub fn open(
        name: &str,
        url: &str,
        cache_dir: &Path,
        kinds: &[BackendKind],
        check_for_updates: bool,
        denylist: Arc<HashSet<String>>,
    ) -> Result<Self> {
        let mut repo = Self::unloaded(name, url, cache_dir);
        fs::create_dir_all(&repo.cache_dir)
            .map_err(|e| Error::IoError(format!("create {}: {e}", repo.cache_dir.display())))?;

        if check_for_updates {
            repo.setup_backend_from_remote(kinds, denylist)?;
        } else {
            repo.setup_backend_from_local(kinds, denylist)?;
        }
        Ok(repo)
    }

    /// A repository shell without a backend. Used by [`Repository::open`]
    /// and by tests that attach a preloaded backend.
    pub fn unloaded(name: &str, url: &str, cache_dir: &Path) -> Self {
        let repo_url = url.trim_end_matches('/').to_string();
        Self {
            name: name.to_string(),
            repomd_url: format!("{repo_url}/repodata/{REPOMD_NAME}"),
            local_repomd: cache_dir.join(REPOMD_NAME),
            repo_url,
            cache_dir: cache_dir.to_path_buf(),
            backend: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.repo_url
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Attach an already-loaded backend, replacing any current one.
    pub fn attach_backend(&mut self, backend: Box<dyn Backend>) {
        self.backend = Some(backend);
    }

    /// Raw bytes of the remote `repomd.xml`.
    fn remote_metadata(&self) -> Result<Vec<u8>> {
        fetch::fetch_bytes(&self.repomd_url)
    }

    /// Raw bytes of the cached `repomd.xml`, or `None` when absent.
    fn local_metadata(&self) -> Result<Option<Vec<u8>>> {
        if !self.local_repomd.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&self.local_repomd).map_err(|e| {
            Error::IoError(format!("read {}: {e}", self.local_repomd.display()))
        })?))
    }

    fn setup_backend_from_remote(
        &mut self,
        kinds: &[BackendKind],
        denylist: Arc<HashSet<String>>,
    ) -> Result<()> {
        let remote_raw = self.remote_metadata()?;
        let remote = parse_repomd(&remote_raw)?;

        // An unreadable cached repomd just means "treat as missing".
        let local = match self.local_metadata()? {
            Some(raw) => match parse_repomd(&raw) {
                Ok(map) => Some(map),
                Err(e) => {
                    warn!("{}: ignoring unreadable cached repomd: {e}", self.name);
                    None
                }
            },
            None => None,
        };

        for kind in kinds {
            let Some(entry) = remote.get(kind.data_type()) else {
                debug!(
                    "{}: no {:?} data advertised, skipping backend",
                    self.name,
                    kind.data_type()
                );
                continue;
            };

            let mut backend =
                kind.create(&self.name, &self.repo_url, &self.cache_dir, denylist.clone());

            let stale = match local.as_ref().and_then(|m| m.get(kind.data_type())) {
                None => true,
                Some(cached) => entry.timestamp > cached.timestamp,
            };

            if stale || !backend.has_db() {
                let url = format!("{}/{}", self.repo_url, entry.location);
                info!("{}: fetching {}", self.name, url);
                if let Err(e) = backend.fetch_latest(&url) {
                    warn!("{}: fetch of {:?} index failed: {e}", self.name, kind.data_type());
                    continue;
                }
                if entry.checksum_type == "sha256" && !entry.checksum.is_empty() {
                    if let Err(e) = fetch::verify_sha256(backend.cached_artifact(), &entry.checksum)
                    {
                        warn!(
                            "{}: {:?} index failed its checksum ({e}), trying next backend",
                            self.name,
                            kind.data_type()
                        );
                        continue;
                    }
                }
                fs::write(&self.local_repomd, &remote_raw).map_err(|e| {
                    Error::IoError(format!("write {}: {e}", self.local_repomd.display()))
                })?;
            }

            match backend.load_db() {
                Ok(()) => {
                    debug!("{}: using {:?} backend", self.name, kind.data_type());
                    self.backend = Some(backend);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "{}: {:?} backend failed to load ({e}), trying next",
                        self.name,
                        kind.data_type()
                    );
                }
            }
        }

        Err(Error::NoBackend(self.name.clone()))
    }

    fn setup_backend_from_local(
        &mut self,
        kinds: &[BackendKind],
        denylist: Arc<HashSet<String>>,
    ) -> Result<()> {
        let raw = self
            .local_metadata()?
            .ok_or_else(|| Error::NoBackend(self.name.clone()))?;
        let local = parse_repomd(&raw)?;

        for kind in kinds {
            if !local.contains_key(kind.data_type()) {
                continue;
            }
            let mut backend =
                kind.create(&self.name, &self.repo_url, &self.cache_dir, denylist.clone());
            if !backend.has_db() {
                continue;
            }
            match backend.load_db() {
                Ok(()) => {
                    self.backend = Some(backend);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "{}: cached {:?} backend failed to load ({e}), trying next",
                        self.name,
                        kind.data_type()
                    );
                }
            }
        }

        Err(Error::NoBackend(self.name.clone()))
    }

    fn backend(&self) -> Result<&dyn Backend> {
        self.backend
            .as_deref()
            .ok_or_else(|| Error::NoBackend(self.name.clone()))
    }

    pub fn find_latest_by_name(
        &self,
        name: &str,
        version: &str,
        release: &str,
    ) -> Result<Arc<Package>> {
        self.backend()?.find_latest_by_name(name, version, release)
    }

    pub fn find_latest_by_require(&self, req: &Requires) -> Result<Arc<Package>> {
        self.backend()?.find_latest_by_require(req)
    }

    pub fn all_packages(&self) -> Vec<Arc<Package>> {
        match self.backend() {
            Ok(b) => b.all_packages(),
            Err(_) => Vec::new(),
        }
    }

    /// Release backend resources. Queries fail afterwards.
    pub fn close(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.close();
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("url", &self.repo_url)
            .field("cache_dir", &self.cache_dir)
            .field("loaded", &self.backend.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const PRIMARY: &str = r#"<metadata xmlns:rpm="x">
  <package type="rpm">
    <name>TestPackage</name>
    <arch>noarch</arch>
    <version epoch="0" ver="1.0.0" rel="1"/>
    <location href="rpms/TestPackage-1.0.0-1.rpm"/>
    <format>
      <rpm:group>Test</rpm:group>
      <rpm:provides>
        <rpm:entry name="TestPackage" flags="EQ" ver="1.0.0" rel="1"/>
      </rpm:provides>
    </format>
  </package>
</metadata>
"#;

    fn write_fixture_repo(root: &Path, timestamp: &str, xml: &str) {
        use sha2::{Digest, Sha256};

        let repodata = root.join("repodata");
        fs::create_dir_all(&repodata).unwrap();

        let mut primary =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        primary.write_all(xml.as_bytes()).unwrap();
        let compressed = primary.finish().unwrap();
        let digest = format!("{:x}", Sha256::digest(&compressed));
        fs::write(repodata.join("primary.xml.gz"), &compressed).unwrap();

        let repomd = format!(
            r#"<repomd>
  <data type="primary">
    <checksum type="sha256">{digest}</checksum>
    <location href="repodata/primary.xml.gz"/>
    <timestamp>{timestamp}</timestamp>
  </data>
</repomd>
"#
        );
        fs::write(repodata.join("repomd.xml"), repomd).unwrap();
    }

    #[test]
    fn test_open_fetches_and_loads_xml_backend() {
        let dir = tempdir().unwrap();
        let remote = dir.path().join("remote");
        let cache = dir.path().join("cache");
        write_fixture_repo(&remote, "100.0", PRIMARY);

        let url = format!("file://{}", remote.display());
        let repo = Repository::open(
            "testrepo",
            &url,
            &cache,
            &[BackendKind::Xml],
            true,
            Arc::new(HashSet::new()),
        )
        .unwrap();

        let pkg = repo.find_latest_by_name("TestPackage", "", "").unwrap();
        assert_eq!(pkg.version(), "1.0.0");
        assert!(cache.join("repomd.xml").exists());
        assert!(cache.join("primary.xml.gz").exists());
    }

    #[test]
    fn test_reopen_skips_download_when_fresh() {
        let dir = tempdir().unwrap();
        let remote = dir.path().join("remote");
        let cache = dir.path().join("cache");
        write_fixture_repo(&remote, "100.0", PRIMARY);
        let url = format!("file://{}", remote.display());

        Repository::open(
            "testrepo",
            &url,
            &cache,
            &[BackendKind::Xml],
            true,
            Arc::new(HashSet::new()),
        )
        .unwrap();

        // poison the remote primary; a fresh timestamp must not refetch
        fs::write(remote.join("repodata/primary.xml.gz"), b"garbage").unwrap();
        let repo = Repository::open(
            "testrepo",
            &url,
            &cache,
            &[BackendKind::Xml],
            true,
            Arc::new(HashSet::new()),
        )
        .unwrap();
        assert!(repo.find_latest_by_name("TestPackage", "", "").is_ok());
    }

    #[test]
    fn test_newer_remote_timestamp_triggers_refresh() {
        let dir = tempdir().unwrap();
        let remote = dir.path().join("remote");
        let cache = dir.path().join("cache");
        write_fixture_repo(&remote, "100.0", PRIMARY);
        let url = format!("file://{}", remote.display());

        Repository::open(
            "testrepo",
            &url,
            &cache,
            &[BackendKind::Xml],
            true,
            Arc::new(HashSet::new()),
        )
        .unwrap();

        // bump the timestamp and rename the only package
        let updated = PRIMARY.replace("TestPackage", "Renamed");
        write_fixture_repo(&remote, "200.0", &updated);

        let repo = Repository::open(
            "testrepo",
            &url,
            &cache,
            &[BackendKind::Xml],
            true,
            Arc::new(HashSet::new()),
        )
        .unwrap();
        assert!(repo.find_latest_by_name("Renamed", "", "").is_ok());
        assert!(repo.find_latest_by_name("TestPackage", "", "").is_err());
    }

    #[test]
    fn test_corrupt_index_fails_backend_selection() {
        let dir = tempdir().unwrap();
        let remote = dir.path().join("remote");
        let cache = dir.path().join("cache");
        write_fixture_repo(&remote, "100.0", PRIMARY);

        // corrupt the artifact but keep the advertised checksum
        let repodata = remote.join("repodata");
        let repomd = fs::read_to_string(repodata.join("repomd.xml")).unwrap();
        fs::write(
            repodata.join("repomd.xml"),
            repomd.replace("100.0", "200.0"),
        )
        .unwrap();
        fs::write(repodata.join("primary.xml.gz"), b"garbage").unwrap();

        let err = Repository::open(
            "testrepo",
            &format!("file://{}", remote.display()),
            &cache,
            &[BackendKind::Xml],
            true,
            Arc::new(HashSet::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoBackend(_)));
    }

    #[test]
    fn test_local_only_mode_requires_cached_data() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();

        let err = Repository::open(
            "testrepo",
            "file:///nowhere",
            &cache,
            &[BackendKind::Xml],
            false,
            Arc::new(HashSet::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoBackend(_)));
    }

    #[test]
    fn test_local_only_mode_uses_cache() {
        let dir = tempdir().unwrap();
        let remote = dir.path().join("remote");
        let cache = dir.path().join("cache");
        write_fixture_repo(&remote, "100.0", PRIMARY);
        let url = format!("file://{}", remote.display());

        Repository::open(
            "testrepo",
            &url,
            &cache,
            &[BackendKind::Xml],
            true,
            Arc::new(HashSet::new()),
        )
        .unwrap();

        // remote gone; local-only still answers
        fs::remove_dir_all(&remote).unwrap();
        let repo = Repository::open(
            "testrepo",
            &url,
            &cache,
            &[BackendKind::Xml],
            false,
            Arc::new(HashSet::new()),
        )
        .unwrap();
        assert!(repo.find_latest_by_name("TestPackage", "", "").is_ok());
    }

    #[test]
    fn test_no_advertised_backend() {
        let dir = tempdir().unwrap();
        let remote = dir.path().join("remote");
        let cache = dir.path().join("cache");
        let repodata = remote.join("repodata");
        fs::create_dir_all(&repodata).unwrap();
        fs::write(
            repodata.join("repomd.xml"),
            r#"<repomd><data type="other"><location href="x"/><timestamp>1</timestamp></data></repomd>"#,
        )
        .unwrap();

        let err = Repository::open(
            "testrepo",
            &format!("file://{}", remote.display()),
            &cache,
            &[BackendKind::Xml],
            true,
            Arc::new(HashSet::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoBackend(_)));
    }
}
