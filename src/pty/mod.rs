//! PTY session management.
//!
//! A session is one spawned shell plus its scrollback and the set of
//! attached clients. The registry owns every live session in the process.

pub mod process;
pub mod registry;
mod session;
pub mod types;

pub use process::PtyProcess;
pub use registry::SessionRegistry;
pub use session::{Activity, ClientHandle, ClientId, Session, MIN_COLS, MIN_ROWS};
pub use types::*;
