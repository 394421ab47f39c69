//! Per-connection upload machine.
//!
//! Driven by FILE_START / FILE_CHUNK frames from the writer client and
//! answered with FILE_ACK frames. At most one transfer is in flight per
//! connection; a new FILE_START silently aborts the previous one. Partial
//! files never survive an error or a disconnect.

use crate::protocol::{AckStatus, Frame};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

struct InFlight {
    name: String,
    declared: u64,
    received: u64,
    file: File,
    path: PathBuf,
}

/// The connection's single upload slot.
#[derive(Default)]
pub struct TransferSlot {
    current: Option<InFlight>,
}

fn ack(status: AckStatus, message: &str) -> Frame {
    Frame::FileAck {
        status,
        message: message.to_string(),
    }
}

fn err_ack(message: &str) -> Frame {
    ack(AckStatus::Error, message)
}

fn discard(t: InFlight) {
    drop(t.file);
    let _ = std::fs::remove_file(&t.path);
}

impl TransferSlot {
    pub fn in_flight(&self) -> bool {
        self.current.is_some()
    }

    /// Begin a transfer into `dir` (the session's working directory).
    pub fn start(&mut self, dir: &Path, name: &str, size: u32) -> Frame {
        self.abort();

        if validate_filename(name).is_err() {
            return err_ack("invalid filename");
        }
        if u64::from(size) > MAX_UPLOAD_BYTES {
            return err_ack("file too large");
        }
        let path = match resolve_in_dir(dir, name) {
            Ok(path) => path,
            Err(reason) => return err_ack(reason),
        };

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&path);
        match file {
            Ok(file) => {
                debug!("upload started: {} ({} bytes)", path.display(), size);
                self.current = Some(InFlight {
                    name: name.to_string(),
                    declared: u64::from(size),
                    received: 0,
                    file,
                    path,
                });
                ack(AckStatus::Progress, "")
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                err_ack("file already exists")
            }
            Err(e) => {
                warn!("upload create failed for {}: {}", path.display(), e);
                err_ack("create failed")
            }
        }
    }

    /// Append a chunk. Offsets must match the bytes received so far; a
    /// mismatch aborts the transfer and removes the partial file.
    pub fn chunk(&mut self, offset: u32, data: &[u8]) -> Frame {
        let Some(mut t) = self.current.take() else {
            return err_ack("no active transfer");
        };
        if u64::from(offset) != t.received {
            discard(t);
            return err_ack("offset mismatch");
        }
        if let Err(e) = t.file.write_all(data) {
            warn!("upload write failed for {}: {}", t.path.display(), e);
            discard(t);
            return err_ack("write failed");
        }
        t.received += data.len() as u64;
        if t.received >= t.declared {
            debug!("upload finished: {}", t.path.display());
            return ack(AckStatus::Success, &t.name);
        }
        self.current = Some(t);
        ack(AckStatus::Progress, "")
    }

    /// Drop any in-flight transfer and its partial file. Called on a new
    /// FILE_START and on disconnect.
    pub fn abort(&mut self) {
        if let Some(t) = self.current.take() {
            debug!("upload aborted: {}", t.path.display());
            discard(t);
        }
    }
}

/// Upload names are single path components: non-empty, no separators,
/// no `..`, not dot-prefixed, no control bytes.
fn validate_filename(name: &str) -> Result<(), ()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.bytes().any(|b| b < 0x20)
    {
        return Err(());
    }
    Ok(())
}

/// Lexically clean `dir/name` and require the result to stay under
/// `dir`. The filename rules already preclude traversal; this is the
/// containment check for anything they might miss.
fn resolve_in_dir(dir: &Path, name: &str) -> Result<PathBuf, &'static str> {
    let joined = dir.join(name);
    let mut clean = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err("invalid path");
                }
            }
            other => clean.push(other),
        }
    }
    if !clean.starts_with(dir) {
        return Err("invalid path");
    }
    Ok(clean)
}
