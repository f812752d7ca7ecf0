// src/rpm/mod.rs

//! RPM identity model: NEVRA tuples, requirement flags, and the
//! release-aware ordering used everywhere a "latest" package is picked.
//!
//! Versions compare segment by segment (numeric where both segments are
//! numeric, lexicographic otherwise). An unset version matches any
//! version of the same name; an unset release matches any release at
//! that version.

use crate::error::{Error, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

/// Comparison flag attached to a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReqFlag {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl ReqFlag {
    /// Parse a flag from repository metadata.
    ///
    /// Accepts the canonical YUM spellings (`EQ`), lowercase variants,
    /// and operator forms (`==`, `<=`, ...). An empty flag normalizes to
    /// `EQ`, matching how the SQLite index stores unversioned entries.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "EQ" | "eq" | "==" | "=" => Ok(ReqFlag::Eq),
            "LT" | "lt" | "<" => Ok(ReqFlag::Lt),
            "GT" | "gt" | ">" => Ok(ReqFlag::Gt),
            "LE" | "le" | "<=" => Ok(ReqFlag::Le),
            "GE" | "ge" | ">=" => Ok(ReqFlag::Ge),
            other => Err(Error::MalformedRequirement(format!(
                "invalid flag {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReqFlag::Eq => "EQ",
            ReqFlag::Lt => "LT",
            ReqFlag::Gt => "GT",
            ReqFlag::Le => "LE",
            ReqFlag::Ge => "GE",
        }
    }
}

impl fmt::Display for ReqFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name / Epoch / Version / Release tuple.
///
/// Empty `version`, `release`, or `epoch` mean "unset". Equality relaxes
/// the release: two tuples with the same name and version are equal when
/// either release is unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Nevra {
    pub name: String,
    pub version: String,
    pub release: String,
    pub epoch: String,
}

impl Nevra {
    pub fn new(name: &str, version: &str, release: &str, epoch: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            epoch: epoch.to_string(),
        }
    }

    /// `name-version-release`.
    pub fn rpm_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }

    /// `name-version-release.rpm`, the artifact filename within a repo.
    pub fn rpm_file_name(&self) -> String {
        format!("{}.rpm", self.rpm_name())
    }

    /// Identifier with unset fields spelled `*`.
    pub fn id(&self) -> String {
        let star = |s: &str| if s.is_empty() { "*".to_string() } else { s.to_string() };
        format!(
            "{}-{}-{}-{}",
            star(&self.name),
            star(&self.version),
            star(&self.release),
            star(&self.epoch)
        )
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rpm_name())
    }
}

/// Release-relaxed equality: same name and version, and releases equal
/// unless either side leaves the release unset.
pub fn rpm_equal(a: &Nevra, b: &Nevra) -> bool {
    if a.name != b.name || a.version != b.version {
        return false;
    }
    if a.release.is_empty() || b.release.is_empty() {
        return true;
    }
    a.release == b.release
}

/// Strict ordering over NEVRA tuples.
///
/// Different names order lexicographically. Within a name, versions
/// compare by segment (numeric when both sides are numeric); a tied
/// prefix is broken by a non-zero extra segment on the longer side,
/// falling back to raw string order. Releases compare by the same rule,
/// and are ignored when either side is unset.
pub fn rpm_less_than(a: &Nevra, b: &Nevra) -> bool {
    if a.name != b.name {
        return a.name < b.name;
    }

    if a.version != b.version {
        return version_less_than(&a.version, &b.version);
    }

    if a.release.is_empty() || b.release.is_empty() {
        return false;
    }
    if a.release == b.release {
        return false;
    }
    version_less_than(&a.release, &b.release)
}

/// Total comparison built from [`rpm_less_than`] / [`rpm_equal`],
/// suitable for `sort_by`.
pub fn rpm_cmp(a: &Nevra, b: &Nevra) -> Ordering {
    if rpm_equal(a, b) {
        Ordering::Equal
    } else if rpm_less_than(a, b) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Segmented comparison of two dotted version (or release) strings.
fn version_less_than(a: &str, b: &str) -> bool {
    let aa: Vec<&str> = a.split('.').collect();
    let bb: Vec<&str> = b.split('.').collect();
    let n = aa.len().min(bb.len());

    for k in 0..n {
        match (aa[k].parse::<i64>(), bb[k].parse::<i64>()) {
            (Ok(x), Ok(y)) => {
                if x != y {
                    return x < y;
                }
            }
            _ => {
                if aa[k] != bb[k] {
                    return aa[k] < bb[k];
                }
            }
        }
    }

    // Common prefix ties: a longer sequence wins only when it carries a
    // non-zero extra segment, otherwise raw string order decides.
    if aa.len() != bb.len() {
        let (extra, longer_is_b) = if aa.len() > bb.len() {
            (&aa[n..], false)
        } else {
            (&bb[n..], true)
        };
        if extra
            .iter()
            .any(|seg| seg.parse::<i64>().map(|v| v != 0).unwrap_or(true))
        {
            return longer_is_b;
        }
    }
    a < b
}

/// Capability a package exposes to satisfy requirements.
#[derive(Debug, Clone)]
pub struct Provides {
    pub nevra: Nevra,
    pub flags: Option<ReqFlag>,
}

impl Provides {
    pub fn new(
        name: &str,
        version: &str,
        release: &str,
        epoch: &str,
        flags: Option<ReqFlag>,
    ) -> Self {
        Self {
            nevra: Nevra::new(name, version, release, epoch),
            flags,
        }
    }

    pub fn name(&self) -> &str {
        &self.nevra.name
    }
}

/// Capability a package needs, resolved against Provides entries.
#[derive(Debug, Clone)]
pub struct Requires {
    pub nevra: Nevra,
    pub flags: ReqFlag,
    /// Scriptlet-prerequisite marker from the metadata. Preserved but
    /// never used for ordering.
    pub pre: String,
}

impl Requires {
    pub fn new(
        name: &str,
        version: &str,
        release: &str,
        epoch: &str,
        flags: ReqFlag,
        pre: &str,
    ) -> Self {
        Self {
            nevra: Nevra::new(name, version, release, epoch),
            flags,
            pre: pre.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.nevra.name
    }

    /// Whether `candidate` satisfies this requirement.
    ///
    /// Names must agree; an unset required version matches trivially,
    /// otherwise the flag is evaluated under the NEVRA ordering.
    pub fn provide_matches(&self, candidate: &Nevra) -> bool {
        if candidate.name != self.nevra.name {
            return false;
        }
        if self.nevra.version.is_empty() {
            return true;
        }
        match self.flags {
            ReqFlag::Eq => rpm_equal(candidate, &self.nevra),
            ReqFlag::Lt => rpm_less_than(candidate, &self.nevra),
            ReqFlag::Gt => {
                !(rpm_equal(candidate, &self.nevra) || rpm_less_than(candidate, &self.nevra))
            }
            ReqFlag::Le => {
                rpm_equal(candidate, &self.nevra) || rpm_less_than(candidate, &self.nevra)
            }
            ReqFlag::Ge => !rpm_less_than(candidate, &self.nevra),
        }
    }
}

/// A package advertised by a YUM repository.
///
/// Immutable after load. Equality is by (name, version, release, epoch).
#[derive(Debug, Clone)]
pub struct Package {
    nevra: Nevra,
    group: String,
    arch: String,
    location: String,
    requires: Vec<Requires>,
    provides: Vec<Provides>,
    repository: String,
    base_url: String,
}

impl Package {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        nevra: Nevra,
        group: String,
        arch: String,
        location: String,
        requires: Vec<Requires>,
        provides: Vec<Provides>,
        repository: String,
        base_url: String,
    ) -> Self {
        Self {
            nevra,
            group,
            arch,
            location,
            requires,
            provides,
            repository,
            base_url,
        }
    }

    pub fn nevra(&self) -> &Nevra {
        &self.nevra
    }

    pub fn name(&self) -> &str {
        &self.nevra.name
    }

    pub fn version(&self) -> &str {
        &self.nevra.version
    }

    pub fn release(&self) -> &str {
        &self.nevra.release
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Relative artifact path within the owning repository.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn requires(&self) -> &[Requires] {
        &self.requires
    }

    pub fn provides(&self) -> &[Provides] {
        &self.provides
    }

    /// Name of the repository this package was loaded from.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn rpm_name(&self) -> String {
        self.nevra.rpm_name()
    }

    pub fn rpm_file_name(&self) -> String {
        self.nevra.rpm_file_name()
    }

    pub fn id(&self) -> String {
        self.nevra.id()
    }

    /// Absolute download URL of the artifact.
    pub fn url(&self) -> String {
        format!("{}/{}", self.base_url, self.location)
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.nevra == other.nevra
    }
}

impl Eq for Package {}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Package: {}\t{}", self.rpm_name(), self.group)?;
        if !self.provides.is_empty() {
            write!(f, "\nProvides:")?;
            for p in &self.provides {
                write!(f, "\n\t{}", p.nevra.rpm_name())?;
            }
        }
        if !self.requires.is_empty() {
            write!(f, "\nRequires:")?;
            for r in &self.requires {
                write!(f, "\n\t{}\t{}", r.nevra.rpm_name(), r.flags)?;
            }
        }
        Ok(())
    }
}

static SPLIT_NAME_VER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)-([\d\.]+)$").expect("split regex"));
static SPLIT_NAME_VER_REL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)-([\d\.]+)-(\d*)$").expect("split regex"));

/// Split a `name[-version[-release]]` spec into its three fields.
///
/// Names may themselves contain hyphens; the split is rightmost-greedy,
/// so a terminal `-<dotted digits>[-<digits>]` run is consumed as
/// version and release. Inputs with no such suffix come back with the
/// version and release unset.
pub fn split_rpm(spec: &str) -> (String, String, String) {
    let triple = |n: &str, v: &str, r: &str| (n.to_string(), v.to_string(), r.to_string());

    match spec.matches('-').count() {
        0 => triple(spec, "", ""),
        1 => {
            if let Some(caps) = SPLIT_NAME_VER.captures(spec) {
                return triple(&caps[1], &caps[2], "");
            }
            triple(spec, "", "")
        }
        _ => {
            if let Some(caps) = SPLIT_NAME_VER_REL.captures(spec) {
                return triple(&caps[1], &caps[2], &caps[3]);
            }
            if let Some(caps) = SPLIT_NAME_VER.captures(spec) {
                return triple(&caps[1], &caps[2], "");
            }
            triple(spec, "", "")
        }
    }
}
