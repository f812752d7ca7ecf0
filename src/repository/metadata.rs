// src/repository/metadata.rs

//! `repomd.xml` parsing.
//!
//! The repomd index advertises the repository's data files (`primary`,
//! `primary_db`, ...) with their checksums, timestamps, and locations.
//! Backend selection matches its own data type against this map.

use crate::error::{Error, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;

/// Timestamp of a repomd data entry, split into whole seconds and
/// nanoseconds (the XML carries a float).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct RepomdTimestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl RepomdTimestamp {
    /// Parse a decimal timestamp such as `1414661806.328`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (secs_str, frac) = match s.split_once('.') {
            Some((a, b)) => (a, b),
            None => (s, ""),
        };
        let secs = secs_str
            .parse::<i64>()
            .map_err(|e| Error::MalformedMetadata(format!("bad timestamp {s:?}: {e}")))?;
        let nanos = if frac.is_empty() {
            0
        } else {
            // pad/truncate the fractional part to 9 digits
            let mut digits: String = frac.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.truncate(9);
            while digits.len() < 9 {
                digits.push('0');
            }
            digits
                .parse::<u32>()
                .map_err(|e| Error::MalformedMetadata(format!("bad timestamp {s:?}: {e}")))?
        };
        Ok(Self { secs, nanos })
    }
}

/// One `<data>` entry of a repomd index.
#[derive(Debug, Clone, Default)]
pub struct RepomdData {
    pub checksum: String,
    /// Digest algorithm of `checksum` (`sha256`, `sha`, ...).
    pub checksum_type: String,
    pub timestamp: RepomdTimestamp,
    /// Location href, relative to the repository URL.
    pub location: String,
}

/// Parse `repomd.xml` into a map keyed by data type.
pub fn parse_repomd(bytes: &[u8]) -> Result<BTreeMap<String, RepomdData>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::MalformedMetadata(format!("repomd is not UTF-8: {e}")))?;
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut entries = BTreeMap::new();
    let mut buf = Vec::new();

    let mut data_type: Option<String> = None;
    let mut current = RepomdData::default();
    let mut current_tag = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "data" {
                    data_type = attribute(&e, b"type");
                    current = RepomdData::default();
                } else if tag == "checksum" && data_type.is_some() {
                    current.checksum_type = attribute(&e, b"type").unwrap_or_default();
                }
                current_tag = tag;
            }
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"location" && data_type.is_some() {
                    if let Some(href) = attribute(&e, b"href") {
                        current.location = href;
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if data_type.is_some() {
                    let text = e
                        .unescape()
                        .map_err(|err| Error::MalformedMetadata(format!("repomd text: {err}")))?;
                    match current_tag.as_str() {
                        "checksum" => current.checksum = text.trim().to_string(),
                        "timestamp" => current.timestamp = RepomdTimestamp::parse(&text)?,
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"data" {
                    if let Some(dtype) = data_type.take() {
                        if current.location.is_empty() {
                            return Err(Error::MalformedMetadata(format!(
                                "repomd data {dtype:?} has no location"
                            )));
                        }
                        entries.insert(dtype, std::mem::take(&mut current));
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::MalformedMetadata(format!("repomd parse: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(a.value.as_ref()).to_string())
}
