//! Process-wide engine handle
//!
//! The server runs exactly one [`Kvs`] shared by the job runners, the
//! session workers and the backup children. This module owns that instance
//! behind an init/terminate lifecycle:
//!
//! - [`init`] constructs the engine and fails with `AlreadyInitialized` on a
//!   second call;
//! - [`handle`] clones the shared handle and fails before `init`;
//! - [`terminate`] drops the instance, and is a no-op when nothing was
//!   initialized.

use std::sync::Arc;

use parking_lot::Mutex;
use pipekvs_core::{Error, Result};

use crate::ops::Kvs;

static ENGINE: Mutex<Option<Arc<Kvs>>> = Mutex::new(None);

/// Initialize the process-wide engine.
///
/// Refuses re-initialization; `terminate` first to rebuild.
pub fn init() -> Result<Arc<Kvs>> {
    let mut slot = ENGINE.lock();
    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }
    let kvs = Arc::new(Kvs::new());
    *slot = Some(Arc::clone(&kvs));
    Ok(kvs)
}

/// Clone the shared engine handle.
pub fn handle() -> Result<Arc<Kvs>> {
    ENGINE.lock().clone().ok_or(Error::NotInitialized)
}

/// Tear the engine down. A no-op when not initialized.
///
/// Outstanding `Arc` handles keep the data alive until they drop; new
/// `handle()` calls fail once this returns.
pub fn terminate() -> Result<()> {
    ENGINE.lock().take();
    Ok(())
}
