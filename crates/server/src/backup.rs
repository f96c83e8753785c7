//! Fork-based snapshots
//!
//! BACKUP forks a child that writes the SHOW-format snapshot to disk.
//! Consistency comes from the fork contract: the parent freezes the table
//! (table lock in write mode), forks, then thaws. No thread can be mid-
//! mutation at fork time, and nobody holds a bucket lock (the table lock is
//! always taken first), so the child inherits a quiescent state and only
//! ever takes free bucket read locks. The child must not touch the table
//! lock: its copy is held by the parent's guard.
//!
//! Admission: at most `max_backups` unreaped children. At the ceiling the
//! caller reaps one earlier child before forking the next, so job progress
//! is bounded by backup completion, exactly once the ceiling is reached.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use nix::sys::wait::{wait, WaitStatus};
use nix::unistd::{fork, ForkResult};
use parking_lot::Mutex;
use pipekvs_core::Result;
use pipekvs_store::Kvs;
use tracing::{debug, warn};

/// Admission control for concurrent backup children.
pub struct BackupCoordinator {
    /// Number of forked children not yet reaped.
    active: Mutex<usize>,
    max_backups: usize,
}

impl BackupCoordinator {
    /// Create a coordinator with the given ceiling (at least 1).
    pub fn new(max_backups: usize) -> Self {
        BackupCoordinator {
            active: Mutex::new(0),
            max_backups: max_backups.max(1),
        }
    }

    /// Run one backup: admit, freeze, fork; the child writes `bck_path`.
    ///
    /// Returns in the parent once the fork happened; the snapshot itself is
    /// written concurrently by the child.
    pub fn run(&self, kvs: &Arc<Kvs>, bck_path: &Path) -> Result<()> {
        self.admit();

        let frozen = kvs.freeze();
        let forked = unsafe { fork() };
        match forked {
            Ok(ForkResult::Parent { child }) => {
                drop(frozen);
                debug!(pid = %child, path = %bck_path.display(), "backup child forked");
                Ok(())
            }
            Ok(ForkResult::Child) => {
                // single-threaded from here; the guard only unlocks this
                // process's copy of the lock. the exit must be _exit: the
                // Rust/libc exit machinery is off-limits after forking a
                // threaded parent, so no logging here either. a failure is
                // reported by the parent from the wait status.
                drop(frozen);
                let status = match write_backup(kvs, bck_path) {
                    Ok(()) => 0,
                    Err(_) => 1,
                };
                unsafe { nix::libc::_exit(status) }
            }
            Err(errno) => {
                drop(frozen);
                self.cancel();
                Err(std::io::Error::from_raw_os_error(errno as i32).into())
            }
        }
    }

    /// Count one admission, reaping an earlier child at the ceiling.
    fn admit(&self) {
        let mut active = self.active.lock();
        if *active >= self.max_backups {
            reap_one();
        } else {
            *active += 1;
        }
    }

    /// Give back an admission after a failed fork.
    fn cancel(&self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
    }

    /// Reap every outstanding child. Called once at server shutdown.
    pub fn reap_all(&self) {
        let mut active = self.active.lock();
        while *active > 0 {
            *active -= 1;
            reap_one();
        }
    }

    /// Outstanding (unreaped) children, for diagnostics.
    pub fn active(&self) -> usize {
        *self.active.lock()
    }
}

fn reap_one() {
    match wait() {
        Ok(WaitStatus::Exited(pid, code)) if code != 0 => {
            warn!(%pid, code, "backup child exited with failure");
        }
        Ok(status) => debug!(?status, "backup child reaped"),
        Err(errno) => warn!(error = %errno, "waiting for backup child failed"),
    }
}

fn write_backup(kvs: &Kvs, bck_path: &Path) -> Result<()> {
    let mut file = File::create(bck_path)?;
    kvs.write_snapshot(&mut file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_file_contents() {
        let kvs = Kvs::new();
        kvs.write(&[
            ("pear".to_string(), "2".to_string()),
            ("apple".to_string(), "1".to_string()),
        ])
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job-1.bck");
        write_backup(&kvs, &path).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "(apple, 1)\n(pear, 2)\n"
        );
    }

    #[test]
    fn test_admission_counter() {
        let coordinator = BackupCoordinator::new(2);
        assert_eq!(coordinator.active(), 0);
        coordinator.admit();
        coordinator.admit();
        assert_eq!(coordinator.active(), 2);
        coordinator.cancel();
        assert_eq!(coordinator.active(), 1);
        coordinator.cancel();
        assert_eq!(coordinator.active(), 0);
        // cancel never underflows
        coordinator.cancel();
        assert_eq!(coordinator.active(), 0);
    }

    #[test]
    fn test_ceiling_is_at_least_one() {
        let coordinator = BackupCoordinator::new(0);
        coordinator.admit();
        assert_eq!(coordinator.active(), 1);
    }
}
