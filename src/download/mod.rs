// src/download/mod.rs

//! Bounded-parallelism artifact downloads.
//!
//! One worker per CPU pulls from a shared queue. A failed task closes
//! the cancel signal; the remaining workers observe it and stop without
//! writing further files. Already-present artifacts that pass the
//! integrity check are skipped.

use crate::context::signal;
use crate::error::{Error, Result};
use crate::repository::fetch;
use crate::rpm::Package;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

/// Integrity check applied to each artifact, before skipping an
/// existing file and after every download.
pub trait ArtifactVerifier: Sync {
    fn verify(&self, path: &Path) -> bool;
}

/// Verifier that accepts any readable file. Used where no external
/// driver is available (dry runs, tests).
pub struct AcceptAll;

impl ArtifactVerifier for AcceptAll {
    fn verify(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Downloads a plan's artifacts into a staging directory.
pub struct Downloader<'a> {
    dest: PathBuf,
    workers: usize,
    verifier: &'a dyn ArtifactVerifier,
}

impl<'a> Downloader<'a> {
    pub fn new(dest: &Path, verifier: &'a dyn ArtifactVerifier) -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            dest: dest.to_path_buf(),
            workers,
            verifier,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Download every unique artifact of `pkgs`, returning the staged
    /// paths (one per unique RPM filename, present and verified).
    pub fn download(&self, pkgs: &[Arc<Package>]) -> Result<Vec<PathBuf>> {
        // dedup by artifact filename
        let mut unique: BTreeMap<String, String> = BTreeMap::new();
        for pkg in pkgs {
            unique.entry(pkg.rpm_file_name()).or_insert_with(|| pkg.url());
        }

        let total = unique.len();
        let done = Mutex::new(0usize);
        let mut queue: Vec<(String, String)> = Vec::new();

        for (fname, url) in &unique {
            let path = self.dest.join(fname);
            if path.exists() && self.verifier.verify(&path) {
                debug!("{fname} already downloaded");
                *done.lock().expect("progress lock") += 1;
                continue;
            }
            queue.push((fname.clone(), url.clone()));
        }

        if !queue.is_empty() {
            self.run_workers(queue, &done, total)?;
        }

        Ok(unique.keys().map(|fname| self.dest.join(fname)).collect())
    }

    fn run_workers(
        &self,
        queue: Vec<(String, String)>,
        done: &Mutex<usize>,
        total: usize,
    ) -> Result<()> {
        let cancel = AtomicBool::new(false);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let queue = Mutex::new(queue);
        let workers = self.workers.min(total.max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if cancel.load(Ordering::Relaxed) || signal::interrupted() {
                            return;
                        }
                        let job = queue.lock().expect("queue lock").pop();
                        let Some((fname, url)) = job else { return };

                        match self.fetch_one(&fname, &url) {
                            Ok(()) => {
                                let count = {
                                    let mut done = done.lock().expect("progress lock");
                                    *done += 1;
                                    *done
                                };
                                info!("[{count:03}/{total:03}] downloaded {url}");
                            }
                            Err(e) => {
                                warn!("download of {url} failed: {e}");
                                let mut slot = first_error.lock().expect("error lock");
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                                cancel.store(true, Ordering::Relaxed);
                                return;
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error.into_inner().expect("error lock") {
            return Err(e);
        }
        if signal::interrupted() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Download one artifact, allowing a single re-download when the
    /// integrity check rejects the first copy.
    fn fetch_one(&self, fname: &str, url: &str) -> Result<()> {
        let path = self.dest.join(fname);
        fetch::download_to(url, &path)?;
        if self.verifier.verify(&path) {
            return Ok(());
        }

        warn!("{fname} failed verification, re-downloading");
        fetch::download_to(url, &path)?;
        if self.verifier.verify(&path) {
            return Ok(());
        }

        let _ = std::fs::remove_file(&path);
        Err(Error::IntegrityFailure(path))
    }
}
