// src/repository/sqlite.rs

//! SQLite index backend.
//!
//! Queries the decompressed `primary.sqlite` database lazily: package
//! rows are joined to their Requires/Provides by `pkgKey` only when a
//! lookup touches them. Numeric columns stored as text are accepted; an
//! empty release stays empty rather than becoming `0`.

use crate::error::{Error, Result};
use crate::rpm::{Nevra, Package, Provides, ReqFlag, Requires};
use bzip2::read::BzDecoder;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::backend::{pick_latest_matching, Backend};
use super::fetch;

const DB_NAME_COMPRESSED: &str = "primary.sqlite.bz2";
const DB_NAME: &str = "primary.sqlite";

const PACKAGE_COLUMNS: &str =
    "pkgKey, name, version, release, epoch, rpm_group, arch, location_href";

/// Backend over the SQLite flavor of the primary index.
pub struct SqliteBackend {
    primary_compressed: PathBuf,
    primary: PathBuf,
    repo_name: String,
    repo_url: String,
    denylist: Arc<HashSet<String>>,
    conn: Option<Connection>,
}

impl SqliteBackend {
    pub fn new(
        repo_name: &str,
        repo_url: &str,
        cache_dir: &Path,
        denylist: Arc<HashSet<String>>,
    ) -> Self {
        Self {
            primary_compressed: cache_dir.join(DB_NAME_COMPRESSED),
            primary: cache_dir.join(DB_NAME),
            repo_name: repo_name.to_string(),
            repo_url: repo_url.to_string(),
            denylist,
            conn: None,
        }
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::NoBackend(format!("{}: database not loaded", self.repo_name)))
    }

    fn decompress_db(&self) -> Result<()> {
        debug!(
            "decompressing {} -> {}",
            self.primary_compressed.display(),
            self.primary.display()
        );
        let input = File::open(&self.primary_compressed).map_err(|e| {
            Error::IoError(format!("open {}: {e}", self.primary_compressed.display()))
        })?;
        let mut decoder = BzDecoder::new(input);
        let mut out = File::create(&self.primary)
            .map_err(|e| Error::IoError(format!("create {}: {e}", self.primary.display())))?;
        io::copy(&mut decoder, &mut out).map_err(|e| {
            Error::MalformedMetadata(format!(
                "decompress {}: {e}",
                self.primary_compressed.display()
            ))
        })?;
        out.sync_all()
            .map_err(|e| Error::IoError(format!("sync {}: {e}", self.primary.display())))?;
        Ok(())
    }

    fn package_from_row(&self, row: &Row<'_>) -> Result<Arc<Package>> {
        let pkg_key: i64 = row.get(0)?;
        let name = column_string(row, 1)?;
        let version = column_string(row, 2)?;
        let release = column_string(row, 3)?;
        let epoch = column_string(row, 4)?;
        let group = column_string(row, 5)?;
        let arch = column_string(row, 6)?;
        let location = column_string(row, 7)?;

        if name.is_empty() {
            return Err(Error::MalformedMetadata(format!(
                "package row {pkg_key} has an empty name"
            )));
        }

        let requires = self.load_requires(pkg_key)?;
        let provides = self.load_provides(pkg_key)?;

        Ok(Arc::new(Package::new(
            Nevra::new(&name, &version, &release, &epoch),
            group,
            arch,
            location,
            requires,
            provides,
            self.repo_name.clone(),
            self.repo_url.clone(),
        )))
    }

    fn load_requires(&self, pkg_key: i64) -> Result<Vec<Requires>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name, version, release, epoch, flags, pre FROM requires WHERE pkgKey = ?1")?;
        let mut rows = stmt.query([pkg_key])?;

        let mut requires = Vec::new();
        while let Some(row) = rows.next()? {
            let name = column_string(row, 0)?;
            let version = column_string(row, 1)?;
            let release = column_string(row, 2)?;
            let epoch = column_string(row, 3)?;
            // a missing flags column normalizes to EQ
            let flags = ReqFlag::parse(&column_string(row, 4)?)?;
            let pre = column_string(row, 5)?;
            requires.push(Requires::new(&name, &version, &release, &epoch, flags, &pre));
        }
        Ok(requires)
    }

    fn load_provides(&self, pkg_key: i64) -> Result<Vec<Provides>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name, version, release, epoch, flags FROM provides WHERE pkgKey = ?1")?;
        let mut rows = stmt.query([pkg_key])?;

        let mut provides = Vec::new();
        while let Some(row) = rows.next()? {
            let name = column_string(row, 0)?;
            let version = column_string(row, 1)?;
            let release = column_string(row, 2)?;
            let epoch = column_string(row, 3)?;
            let flags_raw = column_string(row, 4)?;
            let flags = if flags_raw.is_empty() {
                None
            } else {
                Some(ReqFlag::parse(&flags_raw)?)
            };
            provides.push(Provides::new(&name, &version, &release, &epoch, flags));
        }
        Ok(provides)
    }

    fn load_packages_by_name(&self, name: &str, version: &str) -> Result<Vec<Arc<Package>>> {
        let conn = self.conn()?;
        let mut query = format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE name = ?1");
        if !version.is_empty() {
            query.push_str(" AND version = ?2");
        }
        let mut stmt = conn.prepare(&query)?;

        let mut pkgs = Vec::new();
        let mut rows = if version.is_empty() {
            stmt.query([name])?
        } else {
            stmt.query([name, version])?
        };
        while let Some(row) = rows.next()? {
            pkgs.push(self.package_from_row(row)?);
        }
        Ok(pkgs)
    }

    /// Packages advertising the given capability, joined over the
    /// provides table. The release only constrains the join when it is
    /// a meaningful (non-empty, non-zero) value.
    fn load_packages_providing(&self, prov: &Nevra) -> Result<Vec<Arc<Package>>> {
        let conn = self.conn()?;
        let with_release = !prov.release.is_empty() && prov.release != "0";
        let mut query = format!(
            "SELECT p.pkgKey, p.name, p.version, p.release, p.epoch, p.rpm_group, p.arch, p.location_href
             FROM packages p, provides r
             WHERE p.pkgKey = r.pkgKey AND r.name = ?1 AND r.version = ?2"
        );
        if with_release {
            query.push_str(" AND r.release = ?3");
        }
        let mut stmt = conn.prepare(&query)?;

        let mut pkgs = Vec::new();
        let mut rows = if with_release {
            stmt.query([&prov.name, &prov.version, &prov.release])?
        } else {
            stmt.query([&prov.name, &prov.version])?
        };
        while let Some(row) = rows.next()? {
            pkgs.push(self.package_from_row(row)?);
        }
        Ok(pkgs)
    }

    fn find_provides_by_name(&self, name: &str) -> Result<Vec<Provides>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name, version, release, epoch, flags FROM provides WHERE name = ?1")?;
        let mut rows = stmt.query([name])?;

        let mut provides = Vec::new();
        while let Some(row) = rows.next()? {
            let name = column_string(row, 0)?;
            let version = column_string(row, 1)?;
            let release = column_string(row, 2)?;
            let epoch = column_string(row, 3)?;
            let flags_raw = column_string(row, 4)?;
            let flags = if flags_raw.is_empty() {
                None
            } else {
                Some(ReqFlag::parse(&flags_raw)?)
            };
            provides.push(Provides::new(&name, &version, &release, &epoch, flags));
        }
        Ok(provides)
    }
}

impl Backend for SqliteBackend {
    fn data_type(&self) -> &'static str {
        "primary_db"
    }

    fn fetch_latest(&mut self, url: &str) -> Result<()> {
        fetch::download_to(url, &self.primary_compressed)?;
        self.decompress_db()
    }

    fn cached_artifact(&self) -> &Path {
        &self.primary_compressed
    }

    fn has_db(&self) -> bool {
        self.primary_compressed.exists() || self.primary.exists()
    }

    fn load_db(&mut self) -> Result<()> {
        if !self.primary.exists() {
            self.decompress_db()?;
        }
        let conn = Connection::open_with_flags(
            &self.primary,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        self.conn = Some(conn);
        Ok(())
    }

    fn find_latest_by_name(
        &self,
        name: &str,
        version: &str,
        release: &str,
    ) -> Result<Arc<Package>> {
        let candidates = self.load_packages_by_name(name, version)?;
        pick_latest_matching(&candidates, name, version, release)
    }

    fn find_latest_by_require(&self, req: &Requires) -> Result<Arc<Package>> {
        if self.denylist.contains(req.name()) {
            return Err(Error::NoProvider(req.name().to_string()));
        }

        let provides = self.find_provides_by_name(req.name())?;
        let mut matching: Vec<&Provides> = provides
            .iter()
            .filter(|p| req.provide_matches(&p.nevra))
            .collect();
        if matching.is_empty() {
            return Err(Error::NoProvider(req.name().to_string()));
        }
        matching.sort_by(|a, b| crate::rpm::rpm_cmp(&a.nevra, &b.nevra));
        let best = &matching[matching.len() - 1].nevra;

        let mut pkgs = self.load_packages_providing(best)?;
        if pkgs.is_empty() {
            return Err(Error::NoProvider(req.name().to_string()));
        }
        pkgs.sort_by(|a, b| crate::rpm::rpm_cmp(a.nevra(), b.nevra()));
        Ok(pkgs.pop().expect("non-empty"))
    }

    fn all_packages(&self) -> Vec<Arc<Package>> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let query = format!("SELECT {PACKAGE_COLUMNS} FROM packages");
        let mut stmt = match conn.prepare(&query) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("db error: {e}");
                return Vec::new();
            }
        };
        let mut pkgs = Vec::new();
        let mut rows = match stmt.query([]) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("db error: {e}");
                return Vec::new();
            }
        };
        loop {
            match rows.next() {
                Ok(Some(row)) => match self.package_from_row(row) {
                    Ok(pkg) => pkgs.push(pkg),
                    Err(e) => {
                        tracing::error!("db row error: {e}");
                        return Vec::new();
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("db error: {e}");
                    return Vec::new();
                }
            }
        }
        pkgs
    }

    fn close(&mut self) {
        self.conn = None;
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read a column as a string whatever its declared storage class.
///
/// YUM generators disagree about whether release/epoch are TEXT or
/// INTEGER; NULL maps to the empty (unset) string.
fn column_string(row: &Row<'_>, idx: usize) -> Result<String> {
    let value = row.get_ref(idx)?;
    Ok(match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(b) => String::from_utf8_lossy(b).to_string(),
    })
}
