//! Session workers
//!
//! A pool of `MAX_SESSIONS` threads drains the connect queue. Each worker
//! serves one client at a time: it claims a registry slot, opens the
//! client's three pipes in the rendezvous order (response, request,
//! notification; the client opens its ends in the same order, so neither
//! side deadlocks), answers the CONNECT, then loops on one-byte opcodes
//! until DISCONNECT or EOF.
//!
//! The notification pipe is switched to `O_NONBLOCK` after the blocking
//! open: deliveries happen while the store holds bucket locks, and a full
//! pipe must drop the record rather than stall a mutator.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use pipekvs_core::protocol::{decode_key_field, response};
use pipekvs_core::{Error, OpCode, Result, ConnectRequest, KEY_FIELD_LEN, MAX_SESSIONS, NOTIFICATION_LEN};
use pipekvs_store::{Kvs, NotificationSink, SessionId};
use tracing::{debug, info, warn};

use crate::queue::ConnectQueue;

/// Notification sink over the client's notification FIFO.
///
/// The descriptor is non-blocking; each record is one `write` syscall.
/// Records are far below `PIPE_BUF`, so a write either transfers the whole
/// record or fails, never splits.
pub struct FifoSink {
    pipe: File,
}

impl FifoSink {
    /// Wrap an already-open write end, switching it to non-blocking.
    pub fn new(pipe: File) -> io::Result<Self> {
        let fd = pipe.as_raw_fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL)
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags))
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        Ok(FifoSink { pipe })
    }
}

impl NotificationSink for FifoSink {
    fn send(&self, record: &[u8; NOTIFICATION_LEN]) -> io::Result<()> {
        let written = (&self.pipe).write(record)?;
        if written != record.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "short notification write",
            ));
        }
        Ok(())
    }
}

/// Spawn the session worker pool.
pub fn spawn_session_workers(
    kvs: Arc<Kvs>,
    queue: Arc<ConnectQueue>,
) -> Vec<JoinHandle<()>> {
    (0..MAX_SESSIONS)
        .map(|i| {
            let kvs = Arc::clone(&kvs);
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name(format!("pipekvs-session-{i}"))
                .spawn(move || worker_loop(&kvs, &queue))
                .expect("failed to spawn session worker thread")
        })
        .collect()
}

fn worker_loop(kvs: &Kvs, queue: &ConnectQueue) {
    while let Some(request) = queue.pop() {
        if let Err(e) = serve(kvs, &request) {
            warn!(error = %e, "session ended with error");
        }
    }
}

/// Serve one client connection from CONNECT to teardown.
fn serve(kvs: &Kvs, request: &ConnectRequest) -> Result<()> {
    let Some(session) = kvs.sessions().allocate() else {
        // no free slot: answer the refusal if the response pipe opens
        if let Ok(mut resp) = OpenOptions::new().write(true).open(&request.resp_path) {
            let _ = resp.write_all(&response(OpCode::Connect, false));
        }
        return Err(Error::SessionsExhausted);
    };

    let mut resp = match OpenOptions::new().write(true).open(&request.resp_path) {
        Ok(f) => f,
        Err(e) => {
            release_slot(kvs, session);
            return Err(e.into());
        }
    };
    let mut req = match File::open(&request.req_path) {
        Ok(f) => f,
        Err(e) => {
            let _ = resp.write_all(&response(OpCode::Connect, false));
            release_slot(kvs, session);
            return Err(e.into());
        }
    };
    let sink = match OpenOptions::new()
        .write(true)
        .open(&request.notif_path)
        .and_then(FifoSink::new)
    {
        Ok(s) => Arc::new(s),
        Err(e) => {
            let _ = resp.write_all(&response(OpCode::Connect, false));
            release_slot(kvs, session);
            return Err(e.into());
        }
    };

    if let Err(e) = kvs.sessions().activate(session, sink) {
        release_slot(kvs, session);
        return Err(e);
    }
    if let Err(e) = resp.write_all(&response(OpCode::Connect, true)) {
        let _ = kvs.disconnect(session);
        return Err(e.into());
    }
    info!(session, "session established");

    let outcome = session_loop(kvs, session, &mut req, &mut resp);
    match outcome {
        Ok(true) => Ok(()), // client disconnected; slot already freed
        Ok(false) => {
            // EOF on the request pipe unwinds like a DISCONNECT
            if let Err(e) = kvs.disconnect(session) {
                warn!(session, error = %e, "teardown after EOF failed");
            }
            Ok(())
        }
        Err(e) => {
            if let Err(t) = kvs.disconnect(session) {
                warn!(session, error = %t, "teardown after error failed");
            }
            Err(e)
        }
    }
}

/// Opcode loop. Returns `Ok(true)` after a clean DISCONNECT (slot already
/// released) and `Ok(false)` on request-pipe EOF.
fn session_loop(
    kvs: &Kvs,
    session: SessionId,
    req: &mut File,
    resp: &mut File,
) -> Result<bool> {
    loop {
        let mut op = [0u8; 1];
        match req.read_exact(&mut op) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!(session, "request pipe closed");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        match OpCode::try_from(op[0]) {
            Ok(OpCode::Disconnect) => {
                let ok = match kvs.disconnect(session) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(session, error = %e, "disconnect failed");
                        false
                    }
                };
                resp.write_all(&response(OpCode::Disconnect, ok))?;
                info!(session, "session closed");
                return Ok(true);
            }
            Ok(op @ (OpCode::Subscribe | OpCode::Unsubscribe)) => {
                let mut field = [0u8; KEY_FIELD_LEN];
                req.read_exact(&mut field)?;
                let ok = match decode_key_field(&field) {
                    Ok(key) => {
                        let result = match op {
                            OpCode::Subscribe => kvs.subscribe(session, &key),
                            _ => kvs.unsubscribe(session, &key),
                        };
                        match result {
                            Ok(()) => true,
                            Err(e) => {
                                debug!(session, key = %key, error = %e, "request rejected");
                                false
                            }
                        }
                    }
                    Err(e) => {
                        warn!(session, error = %e, "malformed key payload");
                        false
                    }
                };
                resp.write_all(&response(op, ok))?;
            }
            Ok(OpCode::Connect) | Err(_) => {
                warn!(session, opcode = op[0], "unexpected opcode, request skipped");
            }
        }
    }
}

fn release_slot(kvs: &Kvs, session: SessionId) {
    if let Err(e) = kvs
        .sessions()
        .begin_close(session)
        .and_then(|_| kvs.sessions().release(session))
    {
        warn!(session, error = %e, "failed to release session slot");
    }
}
