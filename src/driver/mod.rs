// src/driver/mod.rs

//! Façade over the external `rpm` binary.
//!
//! Every invocation runs against the site root's private database
//! (`--dbpath`). Relocation arguments are injected only for install and
//! upgrade commands, never for query or remove. Children run in their
//! own process group and are tracked in a registry so the signal
//! handler can terminate everything on interrupt.

use crate::context::signal;
use crate::download::ArtifactVerifier;
use crate::error::{Error, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Interval between checks of the interrupt flag while a child runs.
const WAIT_SLICE: Duration = Duration::from_millis(200);

/// Grace period between SIGTERM and SIGKILL at teardown.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// How much of a failing child's stderr is preserved in the error.
const STDERR_TAIL: usize = 2048;

/// Live children, tracked by process-group id.
#[derive(Default)]
pub struct ProcessRegistry {
    pgids: Mutex<Vec<i32>>,
}

impl ProcessRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, pid: u32) {
        self.pgids.lock().expect("registry lock").push(pid as i32);
    }

    fn unregister(&self, pid: u32) {
        let mut pgids = self.pgids.lock().expect("registry lock");
        pgids.retain(|p| *p != pid as i32);
    }

    /// Terminate every tracked process group: SIGTERM, a short grace
    /// period, then SIGKILL.
    pub fn terminate_all(&self) {
        let pgids: Vec<i32> = self.pgids.lock().expect("registry lock").clone();
        if pgids.is_empty() {
            return;
        }
        for pgid in &pgids {
            let _ = killpg(Pid::from_raw(*pgid), Signal::SIGTERM);
        }
        thread::sleep(KILL_GRACE);
        for pgid in &pgids {
            let _ = killpg(Pid::from_raw(*pgid), Signal::SIGKILL);
        }
    }
}

/// Wrapper around the external RPM tool.
pub struct RpmDriver {
    dbpath: PathBuf,
    relocations: Vec<(String, String)>,
    registry: Arc<ProcessRegistry>,
    dry_run: bool,
    just_db: bool,
}

impl RpmDriver {
    pub fn new(
        dbpath: &Path,
        relocations: Vec<(String, String)>,
        registry: Arc<ProcessRegistry>,
    ) -> Self {
        Self {
            dbpath: dbpath.to_path_buf(),
            relocations,
            registry,
            dry_run: false,
            just_db: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_just_db(mut self, just_db: bool) -> Self {
        self.just_db = just_db;
        self
    }

    /// Whether the external tool is present on PATH.
    pub fn is_available() -> bool {
        Command::new("rpm")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Initialize the RPM database when its directory is empty.
    pub fn init_db(&self) -> Result<()> {
        if self.dbpath.join("Packages").exists() {
            return Ok(());
        }
        debug!("initializing RPM db in {}", self.dbpath.display());
        self.run(false, &["--initdb".to_string()])?;
        Ok(())
    }

    /// The installed set as (name, version, release) triples.
    pub fn query_installed(&self) -> Result<Vec<(String, String, String)>> {
        let out = self.run(
            false,
            &[
                "-qa".to_string(),
                "--queryformat".to_string(),
                "%{NAME} %{VERSION} %{RELEASE}\n".to_string(),
            ],
        )?;

        let mut triples = Vec::new();
        for line in String::from_utf8_lossy(&out).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 3 {
                return Err(Error::IoError(format!("invalid rpm -qa line {line:?}")));
            }
            triples.push((
                fields[0].to_string(),
                fields[1].to_string(),
                fields[2].to_string(),
            ));
        }
        Ok(triples)
    }

    /// Whether `name` (optionally pinned by version/release) is
    /// installed.
    pub fn is_installed(&self, name: &str, version: Option<&str>, release: Option<&str>) -> bool {
        let mut full = name.to_string();
        if let Some(v) = version {
            full.push('-');
            full.push_str(v);
            if let Some(r) = release {
                full.push('-');
                full.push_str(r);
            }
        }
        self.run(false, &["-q".to_string(), full]).is_ok()
    }

    /// Install or update a batch of RPM files in one invocation.
    ///
    /// `update` selects `-Uvh`; plain installs use `-ivh --oldpackage`.
    pub fn install(&self, files: &[PathBuf], update: bool, force: bool) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args: Vec<String> = if update {
            vec!["-Uvh".to_string()]
        } else {
            vec!["-ivh".to_string(), "--oldpackage".to_string()]
        };
        if force {
            args.push("--nodeps".to_string());
        }
        if self.just_db {
            args.push("--justdb".to_string());
        }
        if self.dry_run {
            args.push("--test".to_string());
        }
        for file in files {
            args.push(file.display().to_string());
        }
        self.run(true, &args)?;
        Ok(())
    }

    /// Remove installed packages by name.
    pub fn remove(&self, names: &[String], force: bool) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = vec!["-e".to_string()];
        if force {
            args.push("--nodeps".to_string());
        }
        if self.dry_run {
            args.push("--test".to_string());
        }
        args.extend(names.iter().cloned());
        self.run(true, &args)?;
        Ok(())
    }

    /// Integrity-check one artifact (`rpm -K`).
    pub fn verify_file(&self, file: &Path) -> bool {
        self.run(false, &["-K".to_string(), file.display().to_string()])
            .is_ok()
    }

    /// Files contained in an RPM artifact, rewritten through the
    /// relocation table so they point under the site root.
    pub fn list_files(&self, file: &Path) -> Result<Vec<String>> {
        let out = self.run(false, &["-qlp".to_string(), file.display().to_string()])?;
        Ok(String::from_utf8_lossy(&out)
            .lines()
            .map(|line| self.relocate_path(line.trim()))
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Pass arbitrary arguments through to the tool.
    pub fn passthrough(&self, args: &[String]) -> Result<()> {
        self.run(true, args)?;
        Ok(())
    }

    /// Apply the relocation table to a path from query output.
    pub fn relocate_path(&self, path: &str) -> String {
        let mut out = path.to_string();
        for (from, to) in &self.relocations {
            out = out.replacen(from.as_str(), to.as_str(), 1);
        }
        out
    }

    /// Assemble the full argument vector for one invocation.
    ///
    /// `--dbpath` always leads. Relocation pairs are added only when an
    /// argument starts with `-i` or `-U` and none starts with `-q`.
    fn assemble_args(&self, args: &[String]) -> Vec<String> {
        let mut install_mode = false;
        let mut query_mode = false;
        for arg in args {
            if arg.len() < 2 {
                continue;
            }
            if arg.starts_with("-i") || arg.starts_with("-U") {
                install_mode = true;
                continue;
            }
            if arg.starts_with("-q") {
                query_mode = true;
            }
        }

        let mut full = vec!["--dbpath".to_string(), self.dbpath.display().to_string()];
        if install_mode && !query_mode {
            for (from, to) in &self.relocations {
                full.push("--relocate".to_string());
                full.push(format!("{from}={to}"));
            }
            if !self.relocations.is_empty() {
                full.push("--badreloc".to_string());
            }
        }
        full.extend(args.iter().cloned());
        full
    }

    /// Run the tool, streaming output to the terminal when `display`.
    ///
    /// Returns captured stdout; a non-zero exit becomes
    /// [`Error::DriverFailed`] carrying the stderr tail.
    fn run(&self, display: bool, args: &[String]) -> Result<Vec<u8>> {
        let full_args = self.assemble_args(args);
        debug!("rpm {}", full_args.join(" "));

        let mut child = Command::new("rpm")
            .args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| Error::IoError(format!("failed to spawn rpm: {e}")))?;

        let pid = child.id();
        self.registry.register(pid);
        let result = self.supervise(&mut child, display);
        self.registry.unregister(pid);
        result
    }

    fn supervise(&self, child: &mut Child, display: bool) -> Result<Vec<u8>> {
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let out_reader = thread::spawn(move || tee(stdout, display));
        let err_reader = thread::spawn(move || tee(stderr, display));

        let status = loop {
            if signal::interrupted() {
                let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
                let _ = child.wait_timeout(KILL_GRACE);
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Cancelled);
            }
            match child
                .wait_timeout(WAIT_SLICE)
                .map_err(|e| Error::IoError(format!("wait for rpm: {e}")))?
            {
                Some(status) => break status,
                None => continue,
            }
        };

        let out_buf = out_reader.join().unwrap_or_default();
        let err_buf = err_reader.join().unwrap_or_default();

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            let tail_start = err_buf.len().saturating_sub(STDERR_TAIL);
            let stderr_tail = String::from_utf8_lossy(&err_buf[tail_start..]).into_owned();
            warn!("rpm exited with status {code}");
            return Err(Error::DriverFailed {
                status: code,
                stderr: stderr_tail,
            });
        }
        Ok(out_buf)
    }
}

impl ArtifactVerifier for RpmDriver {
    fn verify(&self, path: &Path) -> bool {
        self.verify_file(path)
    }
}

/// Drain a child stream into a buffer, echoing to our stdout when
/// `display` is set.
fn tee<R: Read>(mut stream: R, display: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if display {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(&chunk[..n]);
                    let _ = stdout.flush();
                }
            }
            Err(_) => break,
        }
    }
    buf
}
