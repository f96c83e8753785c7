//! CONNECT listener
//!
//! Reads fixed-width CONNECT frames from the well-known server FIFO and
//! enqueues them for the session workers. The FIFO is opened read+write so
//! the read end stays open between clients; an idle server blocks in
//! `read_exact` instead of spinning on EOF. Interrupted reads are retried
//! inside `read_exact`.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use pipekvs_core::{ConnectRequest, Result, CONNECT_REQUEST_LEN};
use tracing::{debug, error, warn};

use crate::queue::ConnectQueue;

/// Create the server FIFO under `/tmp` and open it for listening.
///
/// A stale FIFO from an earlier run is removed first. Returns the path
/// (for cleanup at shutdown) together with the open descriptor.
pub fn create_server_fifo(name: &str) -> Result<(PathBuf, File)> {
    let path = Path::new("/tmp").join(name);
    match std::fs::remove_file(&path) {
        Ok(()) => debug!(path = %path.display(), "removed stale server pipe"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    mkfifo(&path, Mode::from_bits_truncate(0o666))
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
    let fifo = OpenOptions::new().read(true).write(true).open(&path)?;
    Ok((path, fifo))
}

/// Listener loop: frame in, queue entry out.
///
/// Runs until the FIFO read fails or the queue is closed. A frame with a
/// bad opcode is a protocol violation: logged, skipped, and the listener
/// keeps going.
pub fn run(mut fifo: &File, queue: &ConnectQueue) {
    loop {
        let mut frame = [0u8; CONNECT_REQUEST_LEN];
        if let Err(e) = fifo.read_exact(&mut frame) {
            error!(error = %e, "server pipe read failed, stopping listener");
            return;
        }
        match ConnectRequest::decode(&frame) {
            Ok(request) => {
                debug!(resp = %request.resp_path, "connection accepted");
                if !queue.push(request) {
                    return; // queue closed, server is shutting down
                }
            }
            Err(e) => warn!(error = %e, "malformed connect frame, request skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_create_open_and_replace_fifo() {
        let name = format!("pipekvs-test-fifo-{}", std::process::id());
        let (path, _fifo) = create_server_fifo(&name).unwrap();
        assert!(path.starts_with("/tmp"));
        // creating again replaces the stale pipe instead of failing
        let (path2, _fifo2) = create_server_fifo(&name).unwrap();
        assert_eq!(path, path2);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_listener_accepts_frame_and_skips_garbage() {
        use std::sync::Arc;

        let name = format!("pipekvs-test-disp-{}", std::process::id());
        let (path, fifo) = create_server_fifo(&name).unwrap();
        let queue = Arc::new(ConnectQueue::new(2));

        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        let garbage = [9u8; CONNECT_REQUEST_LEN];
        writer.write_all(&garbage).unwrap();
        let request = ConnectRequest {
            req_path: "/tmp/reqT".to_string(),
            resp_path: "/tmp/respT".to_string(),
            notif_path: "/tmp/notifT".to_string(),
        };
        writer.write_all(&request.encode().unwrap()).unwrap();

        let listener = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || run(&fifo, &queue))
        };

        // the garbage frame is skipped; the valid one comes through
        let accepted = queue.pop().unwrap();
        assert_eq!(accepted, request);
        queue.close();
        // unblock the listener's pending read so it can observe the close
        writer.write_all(&request.encode().unwrap()).unwrap();
        listener.join().unwrap();
        std::fs::remove_file(&path).unwrap();
    }
}
