//! Local control socket.
//!
//! The daemon listens on a Unix Domain Socket; the `shellbridge` CLI (or the
//! surrounding application) connects to spawn, inspect, resize and kill the
//! shell session, and to stop the daemon.
//!
//! The wire format is newline-delimited JSON: one [`IpcRequest`] per line in,
//! one [`IpcResponse`] per line out.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/shellbridge/daemon.sock`
//! - Fallback: `/tmp/shellbridge-$UID/daemon.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::{IpcClient, get_socket_path};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!
//!     if client.ping().await? {
//!         println!("Daemon is running");
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
mod server;

pub use client::IpcClient;
pub use messages::{IpcRequest, IpcResponse, IpcSessionInfo};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

const APP_DIR: &str = "shellbridge";
const SOCKET_NAME: &str = "daemon.sock";

/// Returns where the daemon's control socket lives.
pub fn get_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR").filter(|dir| !dir.is_empty()) {
        Some(runtime_dir) => PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_NAME),
        None => {
            // Owner of our own procfs entry is our uid.
            let uid = std::fs::metadata("/proc/self").map(|m| m.uid()).unwrap_or(0);
            PathBuf::from(format!("/tmp/{APP_DIR}-{uid}")).join(SOCKET_NAME)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn with_runtime_dir<T>(value: Option<&str>, f: impl FnOnce() -> T) -> T {
        let original = std::env::var_os("XDG_RUNTIME_DIR");
        match value {
            Some(v) => std::env::set_var("XDG_RUNTIME_DIR", v),
            None => std::env::remove_var("XDG_RUNTIME_DIR"),
        }

        let result = f();

        match original {
            Some(v) => std::env::set_var("XDG_RUNTIME_DIR", v),
            None => std::env::remove_var("XDG_RUNTIME_DIR"),
        }
        result
    }

    #[test]
    #[serial]
    fn test_socket_path_with_xdg_runtime_dir() {
        let path = with_runtime_dir(Some("/run/user/1000"), get_socket_path);
        assert_eq!(path, PathBuf::from("/run/user/1000/shellbridge/daemon.sock"));
    }

    #[test]
    #[serial]
    fn test_socket_path_without_xdg_runtime_dir() {
        let path = with_runtime_dir(None, get_socket_path);
        let path = path.to_string_lossy();
        assert!(path.starts_with("/tmp/shellbridge-"));
        assert!(path.ends_with("/daemon.sock"));
    }

    #[test]
    #[serial]
    fn test_empty_runtime_dir_uses_fallback() {
        let path = with_runtime_dir(Some(""), get_socket_path);
        assert!(path.starts_with("/tmp"));
    }
}
