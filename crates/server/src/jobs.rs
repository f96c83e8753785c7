//! Job runner
//!
//! A pool of workers shares one directory iterator behind a mutex; each
//! worker repeatedly takes the next entry, skips anything that is not a
//! `.job` file, and executes the script against the shared store. Results
//! go to `<stem>.out` next to the input; BACKUP snapshots go to
//! `<stem>-<n>.bck` with `n` counting from 1 per job file.
//!
//! A command that fails is logged and the job continues; only failures to
//! open the job's own files abort that job.

use std::fs::{File, ReadDir};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use pipekvs_core::Result;
use pipekvs_store::Kvs;
use tracing::{error, info, warn};

use crate::backup::BackupCoordinator;
use crate::parse::{parse_line, Command, HELP_TEXT};

/// Spawn `max_threads` workers over a shared directory iterator.
pub fn spawn_job_workers(
    kvs: Arc<Kvs>,
    entries: Arc<Mutex<ReadDir>>,
    backups: Arc<BackupCoordinator>,
    max_threads: usize,
) -> Vec<JoinHandle<()>> {
    (0..max_threads)
        .map(|i| {
            let kvs = Arc::clone(&kvs);
            let entries = Arc::clone(&entries);
            let backups = Arc::clone(&backups);
            thread::Builder::new()
                .name(format!("pipekvs-job-{i}"))
                .spawn(move || worker_loop(&kvs, &entries, &backups))
                .expect("failed to spawn job worker thread")
        })
        .collect()
}

fn worker_loop(kvs: &Arc<Kvs>, entries: &Mutex<ReadDir>, backups: &BackupCoordinator) {
    loop {
        let entry = entries.lock().next();
        let Some(entry) = entry else { break };
        let path = match entry {
            Ok(e) => e.path(),
            Err(e) => {
                warn!(error = %e, "unreadable directory entry skipped");
                continue;
            }
        };
        if path.extension().and_then(|e| e.to_str()) != Some("job") {
            continue;
        }
        info!(job = %path.display(), "running job");
        if let Err(e) = run_job(kvs, backups, &path) {
            error!(job = %path.display(), error = %e, "job aborted");
        }
    }
}

/// Execute one `.job` script against the store.
pub fn run_job(kvs: &Arc<Kvs>, backups: &BackupCoordinator, job_path: &Path) -> Result<()> {
    let input = File::open(job_path)?;
    let mut out = File::create(job_path.with_extension("out"))?;
    let mut backups_made = 0u32;

    for line in BufReader::new(input).lines() {
        let line = line?;
        match parse_line(&line) {
            Command::Write(pairs) => {
                if let Err(e) = kvs.write(&pairs) {
                    error!(error = %e, "failed to write pairs");
                }
            }
            Command::Read(keys) => {
                if let Err(e) = kvs.read(&keys, &mut out) {
                    error!(error = %e, "failed to read keys");
                }
            }
            Command::Delete(keys) => {
                if let Err(e) = kvs.delete(&keys, &mut out) {
                    error!(error = %e, "failed to delete keys");
                }
            }
            Command::Show => {
                if let Err(e) = kvs.show(&mut out) {
                    error!(error = %e, "failed to show store");
                }
            }
            Command::Wait(ms) => {
                if ms > 0 {
                    out.write_all(b"Waiting...\n")?;
                    thread::sleep(Duration::from_millis(ms));
                }
            }
            Command::Backup => {
                backups_made += 1;
                let bck_path = backup_path(job_path, backups_made);
                if let Err(e) = backups.run(kvs, &bck_path) {
                    error!(error = %e, "failed to perform backup");
                }
            }
            Command::Help => print!("{HELP_TEXT}"),
            Command::Invalid => warn!(job = %job_path.display(), "invalid command, see HELP for usage"),
            Command::Empty => {}
        }
    }
    Ok(())
}

/// `<dir>/<stem>-<n>.bck` for the n-th backup of a job file.
fn backup_path(job_path: &Path, n: u32) -> PathBuf {
    let stem = job_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("backup");
    job_path.with_file_name(format!("{stem}-{n}.bck"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path_numbering() {
        let job = Path::new("/jobs/batch.job");
        assert_eq!(backup_path(job, 1), Path::new("/jobs/batch-1.bck"));
        assert_eq!(backup_path(job, 12), Path::new("/jobs/batch-12.bck"));
    }
}
