//! Filesystem-based mutual exclusion.
//!
//! Locks are plain files containing the holder's PID. Acquisition is an
//! exclusive create; contention is resolved by polling with backoff up to a
//! fixed timeout. A lock whose recorded PID is no longer a live process (or
//! cannot be parsed) is treated as stale and reclaimed immediately.
//!
//! Locks only coordinate across processes touching the same project; within
//! one coordinator process the scheduler registry is the serialization
//! point. One coordinator process per project is a hard constraint.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::{clog_debug, clog_trace, clog_warn, Error, Result};

const INITIAL_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_millis(250);

/// Platform capability: is the process with this PID alive?
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system's process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessProbe;

impl ProcessProbe for SystemProcessProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        // Signal 0 performs the permission/existence check without
        // delivering anything.
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn is_alive(&self, pid: u32) -> bool {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

/// A named, PID-stamped, timeout-bound exclusive lock on disk.
///
/// Distinct resource names map to distinct lock files and never contend
/// with each other.
pub struct FileLock {
    resource: String,
    path: PathBuf,
    probe: Box<dyn ProcessProbe>,
    acquired: bool,
}

impl FileLock {
    pub fn new(locks_dir: &Path, resource: &str) -> Self {
        Self::with_probe(locks_dir, resource, Box::new(SystemProcessProbe))
    }

    pub fn with_probe(locks_dir: &Path, resource: &str, probe: Box<dyn ProcessProbe>) -> Self {
        Self {
            resource: resource.to_string(),
            path: locks_dir.join(format!("{}.lock", resource)),
            probe,
            acquired: false,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Acquire the lock, polling with backoff up to `timeout`.
    ///
    /// On each contended attempt the recorded holder PID is checked for
    /// liveness; a dead or unparsable holder is deleted and acquisition
    /// retried immediately, bypassing the remaining wait.
    pub fn acquire(&mut self, timeout: Duration) -> Result<()> {
        if self.acquired {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let start = Instant::now();
        let mut poll = INITIAL_POLL;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())?;
                    self.acquired = true;
                    clog_debug!("Lock '{}' acquired", self.resource);
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.reclaim_if_stale()? {
                        // Holder is gone; retry the create immediately.
                        continue;
                    }
                }
                Err(e) => return Err(e.into()),
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(Error::LockTimeout {
                    resource: self.resource.clone(),
                    waited,
                });
            }
            clog_trace!("Lock '{}' contended, polling after {:?}", self.resource, poll);
            std::thread::sleep(poll.min(timeout.saturating_sub(waited)));
            poll = (poll * 2).min(MAX_POLL);
        }
    }

    /// Delete the lock file if its recorded holder is dead or unreadable.
    /// Returns true when the lock was reclaimed.
    fn reclaim_if_stale(&self) -> Result<bool> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            // Lost a race with the holder's release; treat as reclaimed.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        match contents.trim().parse::<u32>() {
            Ok(pid) if self.probe.is_alive(pid) => Ok(false),
            Ok(pid) => {
                clog_warn!(
                    "Reclaiming lock '{}' held by dead process {}",
                    self.resource,
                    pid
                );
                self.delete_lock_file()
            }
            Err(_) => {
                clog_warn!(
                    "Reclaiming lock '{}' with unparsable contents",
                    self.resource
                );
                self.delete_lock_file()
            }
        }
    }

    fn delete_lock_file(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock. Idempotent: safe to call when the file is already
    /// gone or the lock was never acquired.
    pub fn release(&mut self) {
        if !self.acquired {
            return;
        }
        self.acquired = false;
        match std::fs::remove_file(&self.path) {
            Ok(()) => clog_debug!("Lock '{}' released", self.resource),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => clog_warn!("Failed to remove lock '{}': {}", self.resource, e),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lock specialization that allocates globally-unique spec numbers.
///
/// The next number is 1 + the maximum 3-digit numeric prefix found among
/// `NNN-*` directories in the main specs dir and inside every worktree's
/// nested specs dir. The scan is only correct because it happens while the
/// `spec-numbering` lock is held; the result is cached for the duration of
/// the hold.
pub struct SpecNumbering {
    lock: FileLock,
    specs_dir: PathBuf,
    worktrees_dir: PathBuf,
    specs_subdir: String,
    cached: Option<u32>,
}

impl SpecNumbering {
    pub const RESOURCE: &'static str = "spec-numbering";

    pub fn new(locks_dir: &Path, specs_dir: &Path, worktrees_dir: &Path) -> Self {
        let specs_subdir = specs_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("specs")
            .to_string();
        Self {
            lock: FileLock::new(locks_dir, Self::RESOURCE),
            specs_dir: specs_dir.to_path_buf(),
            worktrees_dir: worktrees_dir.to_path_buf(),
            specs_subdir,
            cached: None,
        }
    }

    pub fn acquire(&mut self, timeout: Duration) -> Result<()> {
        self.lock.acquire(timeout)
    }

    pub fn release(&mut self) {
        self.cached = None;
        self.lock.release();
    }

    /// Next globally-unique spec number. Cached for the duration of the
    /// current lock hold.
    pub fn next_spec_number(&mut self) -> Result<u32> {
        if !self.lock.is_acquired() {
            return Err(Error::Validation(
                "spec numbering queried without holding the numbering lock".to_string(),
            ));
        }
        if let Some(n) = self.cached {
            return Ok(n);
        }

        let mut max = 0;
        scan_spec_dirs(&self.specs_dir, &mut max)?;
        if self.worktrees_dir.exists() {
            for entry in std::fs::read_dir(&self.worktrees_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    scan_spec_dirs(&entry.path().join(&self.specs_subdir), &mut max)?;
                }
            }
        }

        let next = max + 1;
        clog_debug!("SpecNumbering::next_spec_number -> {}", next);
        self.cached = Some(next);
        Ok(next)
    }
}

fn spec_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{3})-").expect("valid regex"))
}

/// Update `max` with the largest 3-digit `NNN-` prefix under `dir`.
/// Non-matching names (e.g. `abc-x`, `12-x`) are ignored.
fn scan_spec_dirs(dir: &Path, max: &mut u32) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(caps) = spec_prefix_regex().captures(name) {
            if let Ok(n) = caps[1].parse::<u32>() {
                *max = (*max).max(n);
            }
        }
    }
    Ok(())
}
