//! pipekvs client binary
//!
//! `pipekvs-client <client_id> <server_fifo_name>`
//!
//! Interactive: commands on stdin, notifications printed as they arrive.
//! A dedicated thread drains the notification pipe; it and the command
//! loop both write through the locked stdout handle, so lines never tear.

use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pipekvs_client::Connection;
use pipekvs_core::protocol::decode_notification;
use pipekvs_core::NOTIFICATION_LEN;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pipekvs-client", about = "Interactive client for a pipekvs server")]
struct Args {
    /// Unique id used to name this client's pipes under /tmp
    client_id: String,
    /// Name of the server FIFO under /tmp
    server_fifo_name: String,
}

const USAGE: &str = "Available commands:\n\
    \x20 SUBSCRIBE <key>\n\
    \x20 UNSUBSCRIBE <key>\n\
    \x20 DELAY <ms>\n\
    \x20 DISCONNECT\n\
    \x20 HELP\n";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(1);
    });
    if let Err(e) = run(args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let (mut conn, notif) = Connection::connect(&args.client_id, &args.server_fifo_name)
        .context("connecting to server")?;
    report("connect", true);

    let reader = thread::spawn(move || notification_loop(notif));

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else { continue };

        match (command.to_ascii_uppercase().as_str(), words.next()) {
            ("SUBSCRIBE", Some(key)) => {
                let ok = conn.subscribe(key).context("subscribe request")?;
                report("subscribe", ok);
            }
            ("UNSUBSCRIBE", Some(key)) => {
                let ok = conn.unsubscribe(key).context("unsubscribe request")?;
                report("unsubscribe", ok);
            }
            ("DELAY", Some(ms)) => match ms.parse::<u64>() {
                Ok(ms) => thread::sleep(Duration::from_millis(ms)),
                Err(_) => print_usage(),
            },
            ("DISCONNECT", None) => break,
            ("HELP", None) => print_usage(),
            _ => print_usage(),
        }
    }

    let ok = conn.disconnect().context("disconnecting")?;
    report("disconnect", ok);

    // the server closed its end of the notification pipe at disconnect, so
    // the reader sees EOF and exits
    if reader.join().is_err() {
        warn!("notification reader panicked");
    }
    Ok(())
}

/// Drain the notification pipe, printing one `(key,value)` line per record.
fn notification_loop(mut notif: File) {
    loop {
        let mut record = [0u8; NOTIFICATION_LEN];
        if notif.read_exact(&mut record).is_err() {
            // EOF: the server dropped the write end
            return;
        }
        match decode_notification(&record) {
            Ok((key, value)) => {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                let _ = writeln!(out, "({key},{value})");
            }
            Err(e) => warn!(error = %e, "undecodable notification record"),
        }
    }
}

fn report(operation: &str, ok: bool) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(
        out,
        "Server returned {} for operation: {operation}",
        if ok { '0' } else { '1' }
    );
}

fn print_usage() {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = write!(out, "{USAGE}");
}
