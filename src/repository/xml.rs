// src/repository/xml.rs

//! XML index backend.
//!
//! Parses a (usually gzip-compressed) `primary.xml` stream into the
//! in-memory catalog. A file without the gzip magic is parsed raw, so
//! uncompressed mirrors and fixture files work unchanged.

use crate::error::{Error, Result};
use crate::rpm::{Nevra, Package, Provides, ReqFlag, Requires};
use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::backend::{Backend, Catalog};
use super::fetch;

const DB_NAME: &str = "primary.xml.gz";

/// Backend over the XML flavor of the primary index.
pub struct XmlBackend {
    primary: PathBuf,
    repo_name: String,
    repo_url: String,
    denylist: Arc<HashSet<String>>,
    catalog: Catalog,
}

impl XmlBackend {
    pub fn new(
        repo_name: &str,
        repo_url: &str,
        cache_dir: &Path,
        denylist: Arc<HashSet<String>>,
    ) -> Self {
        Self {
            primary: cache_dir.join(DB_NAME),
            repo_name: repo_name.to_string(),
            repo_url: repo_url.to_string(),
            denylist,
            catalog: Catalog::new(),
        }
    }

    fn read_index(&self) -> Result<String> {
        let raw = fs::read(&self.primary)
            .map_err(|e| Error::IoError(format!("read {}: {e}", self.primary.display())))?;

        // gzip magic: 1f 8b
        let text = if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut out = String::new();
            decoder.read_to_string(&mut out).map_err(|e| {
                Error::MalformedMetadata(format!("decompress {}: {e}", self.primary.display()))
            })?;
            out
        } else {
            String::from_utf8(raw).map_err(|e| {
                Error::MalformedMetadata(format!("{} is not UTF-8: {e}", self.primary.display()))
            })?
        };
        Ok(text)
    }

    fn parse_index(&mut self, xml: &str) -> Result<usize> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut count = 0usize;

        let mut current: Option<PackageBuilder> = None;
        let mut current_tag = String::new();
        let mut section = DepSection::None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    match tag.as_str() {
                        "package" => current = Some(PackageBuilder::default()),
                        "rpm:provides" => section = DepSection::Provides,
                        "rpm:requires" => section = DepSection::Requires,
                        // attribute-bearing elements may appear non-self-closed
                        "version" | "location" | "rpm:entry" => {
                            if let Some(pkg) = current.as_mut() {
                                match tag.as_str() {
                                    "version" => pkg.read_version(&e),
                                    "location" => {
                                        if let Some(href) = attribute(&e, b"href") {
                                            pkg.location = href;
                                        }
                                    }
                                    _ => pkg.read_entry(&e, section)?,
                                }
                            }
                        }
                        _ => {}
                    }
                    current_tag = tag;
                }
                Ok(Event::Empty(e)) => {
                    let tag = e.name().as_ref().to_vec();
                    if let Some(pkg) = current.as_mut() {
                        match tag.as_slice() {
                            b"version" => pkg.read_version(&e),
                            b"location" => {
                                if let Some(href) = attribute(&e, b"href") {
                                    pkg.location = href;
                                }
                            }
                            b"rpm:entry" => pkg.read_entry(&e, section)?,
                            _ => {}
                        }
                    }
                }
                Ok(Event::Text(e)) => {
                    if let Some(pkg) = current.as_mut() {
                        let text = e
                            .unescape()
                            .map_err(|err| Error::MalformedMetadata(format!("primary text: {err}")))?
                            .to_string();
                        match current_tag.as_str() {
                            "name" => pkg.name = text,
                            "arch" => pkg.arch = text,
                            "rpm:group" => pkg.group = text,
                            _ => {}
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    match e.name().as_ref() {
                        b"package" => {
                            if let Some(builder) = current.take() {
                                let pkg =
                                    builder.build(&self.repo_name, &self.repo_url)?;
                                self.catalog.insert(Arc::new(pkg), &self.denylist);
                                count += 1;
                            }
                        }
                        b"rpm:provides" | b"rpm:requires" => section = DepSection::None,
                        _ => {}
                    }
                    current_tag.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::MalformedMetadata(format!("primary parse: {e}")));
                }
                _ => {}
            }
            buf.clear();
        }

        Ok(count)
    }
}

impl Backend for XmlBackend {
    fn data_type(&self) -> &'static str {
        "primary"
    }

    fn fetch_latest(&mut self, url: &str) -> Result<()> {
        fetch::download_to(url, &self.primary)
    }

    fn cached_artifact(&self) -> &Path {
        &self.primary
    }

    fn has_db(&self) -> bool {
        self.primary.exists()
    }

    fn load_db(&mut self) -> Result<()> {
        info!("parsing metadata XML file ({})", self.primary.display());
        let xml = self.read_index()?;
        self.catalog.clear();
        let count = self.parse_index(&xml)?;
        debug!("loaded {} packages from {}", count, self.primary.display());
        Ok(())
    }

    fn find_latest_by_name(
        &self,
        name: &str,
        version: &str,
        release: &str,
    ) -> Result<Arc<Package>> {
        self.catalog.find_latest_by_name(name, version, release)
    }

    fn find_latest_by_require(&self, req: &Requires) -> Result<Arc<Package>> {
        self.catalog.find_latest_by_require(req)
    }

    fn all_packages(&self) -> Vec<Arc<Package>> {
        self.catalog.all_packages()
    }

    fn close(&mut self) {
        self.catalog.clear();
    }
}

#[derive(Clone, Copy, PartialEq)]
enum DepSection {
    None,
    Provides,
    Requires,
}

#[derive(Default)]
struct PackageBuilder {
    name: String,
    arch: String,
    group: String,
    epoch: String,
    version: String,
    release: String,
    location: String,
    provides: Vec<Provides>,
    requires: Vec<Requires>,
}

impl PackageBuilder {
    fn read_version(&mut self, e: &BytesStart<'_>) {
        if let Some(v) = attribute(e, b"ver") {
            self.version = v;
        }
        if let Some(r) = attribute(e, b"rel") {
            self.release = r;
        }
        if let Some(ep) = attribute(e, b"epoch") {
            self.epoch = ep;
        }
    }

    fn read_entry(&mut self, e: &BytesStart<'_>, section: DepSection) -> Result<()> {
        if section == DepSection::None {
            return Ok(());
        }
        let name = match attribute(e, b"name") {
            Some(n) => n,
            None => {
                return Err(Error::MalformedMetadata(
                    "rpm:entry without a name".to_string(),
                ))
            }
        };
        let version = attribute(e, b"ver").unwrap_or_default();
        let release = attribute(e, b"rel").unwrap_or_default();
        let epoch = attribute(e, b"epoch").unwrap_or_default();
        let flags_raw = attribute(e, b"flags");

        match section {
            DepSection::Provides => {
                let flags = match flags_raw.as_deref() {
                    None => None,
                    Some(s) => Some(ReqFlag::parse(s)?),
                };
                self.provides
                    .push(Provides::new(&name, &version, &release, &epoch, flags));
            }
            DepSection::Requires => {
                let flags = ReqFlag::parse(flags_raw.as_deref().unwrap_or(""))?;
                let pre = attribute(e, b"pre").unwrap_or_default();
                self.requires
                    .push(Requires::new(&name, &version, &release, &epoch, flags, &pre));
            }
            DepSection::None => unreachable!(),
        }
        Ok(())
    }

    fn build(self, repo_name: &str, repo_url: &str) -> Result<Package> {
        if self.name.is_empty() {
            return Err(Error::MalformedMetadata(
                "package element without a name".to_string(),
            ));
        }
        Ok(Package::new(
            Nevra::new(&self.name, &self.version, &self.release, &self.epoch),
            self.group,
            self.arch,
            self.location,
            self.requires,
            self.provides,
            repo_name.to_string(),
            repo_url.to_string(),
        ))
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(a.value.as_ref()).to_string())
}
