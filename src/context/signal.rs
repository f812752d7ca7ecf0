// src/context/signal.rs

//! Interrupt handling.
//!
//! A single process-wide flag records that SIGINT/SIGTERM was observed.
//! Long-running loops (download workers, child-process waits) poll it;
//! a watcher thread terminates every registered child process group,
//! flushes stdio, and exits with code 1.

use crate::driver::ProcessRegistry;
use nix::libc::c_int;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::error;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether an interrupt has been observed.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

extern "C" fn mark_interrupted(_sig: c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// Install the interrupt handler and spawn the teardown watcher.
///
/// Call once at context construction. On interrupt the watcher signals
/// every registered child process group, flushes stdio, and exits 1.
pub fn install(registry: Arc<ProcessRegistry>) {
    let action = SigAction::new(
        SigHandler::Handler(mark_interrupted),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        if let Err(e) = sigaction(Signal::SIGINT, &action) {
            error!("failed to install SIGINT handler: {e}");
        }
        if let Err(e) = sigaction(Signal::SIGTERM, &action) {
            error!("failed to install SIGTERM handler: {e}");
        }
    }

    thread::spawn(move || loop {
        if interrupted() {
            error!("interrupt caught, terminating subprocesses");
            registry.terminate_all();
            let _ = std::io::stdout().flush();
            let _ = std::io::stderr().flush();
            std::process::exit(1);
        }
        thread::sleep(Duration::from_millis(100));
    });
}
