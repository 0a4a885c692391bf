//! Control requests and responses exchanged with the running daemon.
//!
//! Each message is one JSON object on its own line.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::session::SessionInfo;

/// Requests that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Start a shell, replacing any current one.
    Spawn {
        /// Working directory for the shell.
        cwd: PathBuf,
        /// Terminal width. Uses the configured default when absent.
        cols: Option<u16>,
        /// Terminal height. Uses the configured default when absent.
        rows: Option<u16>,
    },
    /// Describe the current session.
    Info,
    /// Resize the current session's terminal.
    Resize {
        /// New width.
        cols: u16,
        /// New height.
        rows: u16,
    },
    /// Kill the current session.
    Kill,
    /// Request the daemon to stop gracefully.
    Stop,
}

/// Responses sent from the daemon to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// A shell was spawned.
    Spawned {
        /// Identifier viewers use to attach.
        session_id: String,
    },
    /// Snapshot of the current session, if there is one.
    Info {
        session: Option<IpcSessionInfo>,
    },
    /// The resize was applied.
    Resized,
    /// The session was killed. `None` when there was nothing to kill.
    Killed {
        session_id: Option<String>,
    },
    /// Acknowledgment that the daemon is stopping.
    Stopping,
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// Session details as reported over IPC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcSessionInfo {
    pub id: String,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub viewers: usize,
    pub pid: Option<u32>,
}

impl From<SessionInfo> for IpcSessionInfo {
    fn from(info: SessionInfo) -> Self {
        Self {
            id: info.id,
            cwd: info.cwd,
            cols: info.cols,
            rows: info.rows,
            viewers: info.viewers,
            pid: info.pid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ping_serialization() {
        let json = serde_json::to_string(&IpcRequest::Ping).unwrap();
        assert_eq!(json, r#""Ping""#);
    }

    #[test]
    fn test_request_spawn_roundtrip() {
        let request = IpcRequest::Spawn {
            cwd: PathBuf::from("/tmp/proj"),
            cols: Some(120),
            rows: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""cwd":"/tmp/proj""#));

        let parsed: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_response_info_without_session() {
        let json = serde_json::to_string(&IpcResponse::Info { session: None }).unwrap();
        assert_eq!(json, r#"{"Info":{"session":null}}"#);
    }

    #[test]
    fn test_session_info_conversion() {
        let info = SessionInfo {
            id: "abc".to_string(),
            cwd: PathBuf::from("/home"),
            cols: 80,
            rows: 24,
            viewers: 2,
            pid: Some(99),
        };
        let ipc: IpcSessionInfo = info.into();
        assert_eq!(ipc.id, "abc");
        assert_eq!(ipc.viewers, 2);
        assert_eq!(ipc.pid, Some(99));
    }

    #[test]
    fn test_unknown_request_rejected() {
        assert!(serde_json::from_str::<IpcRequest>(r#""Reboot""#).is_err());
    }
}
