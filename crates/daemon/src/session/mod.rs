//! Shell session management.
//!
//! One login shell runs on a PTY and is shared by any number of viewers.
//! [`SessionManager`] owns its lifecycle; [`pty`] spawns and signals the
//! process; [`viewer`] is the outbound side of each attached connection.

pub mod manager;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod pty;
pub mod shell;
pub mod viewer;

pub use manager::{SessionInfo, SessionManager, SessionSettings};
pub use pty::{PtySpawner, SessionError, SessionId, ShellEvent, ShellHandle, ShellSpawner};
pub use viewer::{ViewerChannel, ViewerHandle, ViewerId};
