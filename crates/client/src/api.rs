//! Client connection API
//!
//! The handshake dance, in lockstep with the server's session worker:
//!
//! 1. Create `/tmp/req<id>`, `/tmp/resp<id>`, `/tmp/notif<id>` (removing
//!    stale ones first).
//! 2. Write the CONNECT frame to the server FIFO and close it.
//! 3. Open resp for reading: this is the rendezvous with the worker's
//!    write-side open, and it must come first on both sides.
//! 4. Open req for writing, then notif for reading.
//! 5. Read the 2-byte CONNECT response.
//!
//! Every request after that is one fixed-width frame on req followed by a
//! 2-byte reply on resp.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use pipekvs_core::protocol::{encode_key_request, response};
use pipekvs_core::{
    ConnectRequest, Error, OpCode, Result, RESPONSE_LEN, RESULT_OK,
};
use tracing::debug;

/// An established client session.
pub struct Connection {
    req: File,
    resp: File,
    req_path: PathBuf,
    resp_path: PathBuf,
    notif_path: PathBuf,
}

impl Connection {
    /// Create the client pipes and connect to `/tmp/<server_fifo_name>`.
    ///
    /// Returns the connection plus the read end of the notification pipe,
    /// which the caller should drain on its own thread.
    pub fn connect(client_id: &str, server_fifo_name: &str) -> Result<(Self, File)> {
        let req_path = PathBuf::from(format!("/tmp/req{client_id}"));
        let resp_path = PathBuf::from(format!("/tmp/resp{client_id}"));
        let notif_path = PathBuf::from(format!("/tmp/notif{client_id}"));

        for path in [&req_path, &resp_path, &notif_path] {
            remove_stale(path)?;
            mkfifo(path.as_path(), Mode::from_bits_truncate(0o666))
                .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        }

        let frame = ConnectRequest {
            req_path: req_path.display().to_string(),
            resp_path: resp_path.display().to_string(),
            notif_path: notif_path.display().to_string(),
        }
        .encode()?;

        {
            let server_path = Path::new("/tmp").join(server_fifo_name);
            let mut server = OpenOptions::new().write(true).open(&server_path)?;
            server.write_all(&frame)?;
        }

        // rendezvous order mirrors the server: resp, req, notif
        let mut resp = File::open(&resp_path)?;
        let req = OpenOptions::new().write(true).open(&req_path)?;
        let notif = File::open(&notif_path)?;

        let mut reply = [0u8; RESPONSE_LEN];
        resp.read_exact(&mut reply)?;
        debug!(result = %(reply[1] as char), "connect reply");
        if reply != response(OpCode::Connect, true) {
            return Err(Error::Protocol(format!(
                "server refused connection with {:?}",
                reply[1] as char
            )));
        }

        Ok((
            Connection {
                req,
                resp,
                req_path,
                resp_path,
                notif_path,
            },
            notif,
        ))
    }

    /// Subscribe to a key. Returns the server's verdict: true when the key
    /// exists and the subscription was recorded.
    pub fn subscribe(&mut self, key: &str) -> Result<bool> {
        self.key_request(OpCode::Subscribe, key)
    }

    /// Remove a subscription. Returns true when it existed.
    pub fn unsubscribe(&mut self, key: &str) -> Result<bool> {
        self.key_request(OpCode::Unsubscribe, key)
    }

    fn key_request(&mut self, op: OpCode, key: &str) -> Result<bool> {
        let frame = encode_key_request(op, key)?;
        self.req.write_all(&frame)?;
        Ok(self.read_reply(op)? == RESULT_OK)
    }

    /// Disconnect: request, reply, close and remove the client pipes.
    pub fn disconnect(mut self) -> Result<bool> {
        self.req.write_all(&[OpCode::Disconnect as u8])?;
        let result = self.read_reply(OpCode::Disconnect)?;
        self.remove_pipes();
        Ok(result == RESULT_OK)
    }

    fn read_reply(&mut self, op: OpCode) -> Result<u8> {
        let mut reply = [0u8; RESPONSE_LEN];
        self.resp.read_exact(&mut reply)?;
        if reply[0] != op as u8 {
            return Err(Error::Protocol(format!(
                "reply opcode {} does not match request {:?}",
                reply[0], op
            )));
        }
        Ok(reply[1])
    }

    fn remove_pipes(&self) {
        for path in [&self.req_path, &self.resp_path, &self.notif_path] {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
