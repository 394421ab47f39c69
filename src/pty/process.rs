//! OS side of a session: a login shell attached to a freshly-allocated
//! pseudo-terminal.
//!
//! Reads come off the returned reader handle (the session's broadcaster
//! owns it); writes go through a dedicated writer thread fed by a bounded
//! channel so a stalled PTY never blocks a connection task.

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getuid, Pid, User};
use parking_lot::{Mutex, RwLock};
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write as IoWrite};
use std::path::PathBuf;
use std::sync::mpsc::SyncSender;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;
const FALLBACK_SHELL: &str = "/bin/bash";
const PTY_WRITE_CHUNK_SIZE: usize = 512;
const PTY_INPUT_CHANNEL_SIZE: usize = 1024;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Inner PTY state that requires mutex protection
struct PtyProcessInner {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn portable_pty::Child + Send>,
}

/// A shell process attached to a PTY.
pub struct PtyProcess {
    inner: Mutex<PtyProcessInner>,
    /// Shell command
    pub shell: String,
    /// Process ID
    pub pid: u32,
    size: RwLock<(u16, u16)>,
    /// Input channel (bounded for backpressure)
    input_tx: SyncSender<Vec<u8>>,
}

/// The owning user's login shell from the password database, with their
/// home directory. Falls back to `/bin/bash` and `/` when the lookup
/// comes up empty.
fn login_shell() -> (String, PathBuf) {
    let home_fallback =
        || std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/"));
    match User::from_uid(getuid()) {
        Ok(Some(user)) => {
            let shell = user.shell.to_string_lossy().into_owned();
            let shell = if shell.is_empty() {
                FALLBACK_SHELL.to_string()
            } else {
                shell
            };
            (shell, user.dir)
        }
        _ => (FALLBACK_SHELL.to_string(), home_fallback()),
    }
}

impl PtyProcess {
    /// Spawn the login shell on a new PTY. Returns the process handle and
    /// the raw output reader for the session's broadcaster.
    pub fn spawn(id: &str) -> Result<(Self, Box<dyn Read + Send>)> {
        let (shell, home) = login_shell();

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.arg("-l");
        cmd.cwd(&home);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("SHELL", &shell);

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn shell")?;
        let pid = child.process_id().unwrap_or(0);

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        let (input_tx, input_rx) = std::sync::mpsc::sync_channel(PTY_INPUT_CHANNEL_SIZE);
        spawn_pty_writer_thread(id.to_string(), writer, input_rx);

        info!("[pty:{}] spawned {} (pid {})", id, shell, pid);

        Ok((
            Self {
                inner: Mutex::new(PtyProcessInner {
                    master: pair.master,
                    child,
                }),
                shell,
                pid,
                size: RwLock::new((DEFAULT_COLS, DEFAULT_ROWS)),
                input_tx,
            },
            reader,
        ))
    }

    /// Queue input bytes for the shell.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|_| anyhow::anyhow!("PTY input channel closed"))
    }

    /// Current PTY dimensions (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        *self.size.read()
    }

    /// Resize the PTY window and signal the shell to redraw.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        *self.size.write() = (cols, rows);
        {
            let inner = self.inner.lock();
            inner
                .master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .context("Failed to resize PTY")?;
        }
        if self.pid != 0 {
            let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGWINCH);
        }
        Ok(())
    }

    /// Shell's current working directory via `/proc/<pid>/cwd`.
    pub fn read_cwd(&self) -> Option<PathBuf> {
        std::fs::read_link(format!("/proc/{}/cwd", self.pid)).ok()
    }

    /// Exit code if the shell has terminated: the process's status, or
    /// -1 when the status cannot be read.
    pub fn try_wait(&self) -> Option<i32> {
        let mut inner = self.inner.lock();
        match inner.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            Ok(None) => None,
            Err(e) => {
                error!("[pty:{}] wait failed: {}", self.pid, e);
                Some(-1)
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.try_wait().is_none()
    }

    /// Block (async) until the shell exits and return its exit code.
    pub async fn wait(&self) -> i32 {
        loop {
            if let Some(code) = self.try_wait() {
                return code;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    /// Kill the shell. The PTY file descriptors close when the process
    /// handle is dropped; the broadcaster observes EOF.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if let Err(e) = inner.child.kill() {
            warn!("[pty:{}] failed to kill shell: {}", self.pid, e);
        }
    }
}

/// Spawns a dedicated thread for PTY writes
fn spawn_pty_writer_thread(
    id: String,
    mut writer: Box<dyn IoWrite + Send>,
    input_rx: std::sync::mpsc::Receiver<Vec<u8>>,
) {
    std::thread::spawn(move || {
        while let Ok(data) = input_rx.recv() {
            // Write in small chunks to prevent blocking
            for chunk in data.chunks(PTY_WRITE_CHUNK_SIZE) {
                if let Err(e) = writer.write_all(chunk) {
                    error!("[writer:{}] write error: {}", id, e);
                    return;
                }
                if let Err(e) = writer.flush() {
                    error!("[writer:{}] flush error: {}", id, e);
                    return;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_shell_is_absolute() {
        let (shell, home) = login_shell();
        assert!(shell.starts_with('/'), "shell should be absolute: {shell}");
        assert!(home.is_absolute());
    }
}
