// src/lib.rs

//! sitepkr — userspace RPM installer for relocatable site roots.
//!
//! Fetches RPM packages from YUM-style repositories and installs them
//! under an arbitrary site root with a private RPM database, fully
//! independent of the host's package manager.
//!
//! # Architecture
//!
//! - NEVRA model with release-aware segmented version comparison
//! - Repository metadata engine: repomd + primary index, XML or SQLite
//! - Multi-repo client with deterministic cross-repo "latest" lookups
//! - Cycle-tolerant dependency resolver with a capability denylist
//! - Install/update planners classifying against the installed set
//! - Bounded-parallel download scheduler with cancellation
//! - Façade over the external `rpm` tool with path relocation

pub mod config;
pub mod context;
pub mod download;
pub mod driver;
mod error;
pub mod planner;
pub mod repository;
pub mod resolver;
pub mod rpm;

pub use config::{Profile, RepoConfig, PROFILES};
pub use context::{Context, ContextOptions};
pub use download::{ArtifactVerifier, Downloader};
pub use driver::{ProcessRegistry, RpmDriver};
pub use error::{Error, Result};
pub use planner::{
    InstallOptions, InstallPlan, InstalledSet, Mode, PlanEntry, PlanReason, Planner, RpmSpec,
    UpdateKind, UpdateMode, UpdatePlan, SELF_PACKAGE,
};
pub use repository::{Backend, BackendKind, Client, Repository, DEFAULT_BACKENDS};
pub use resolver::{default_denylist, Resolution, Resolver, DEFAULT_DENYLIST};
pub use rpm::{
    rpm_cmp, rpm_equal, rpm_less_than, split_rpm, Nevra, Package, Provides, ReqFlag, Requires,
};
