//! # ShellBridge Daemon Library
//!
//! Keeps one interactive shell alive on a local PTY and shares it with any
//! number of browser viewers over WebSocket.
//!
//! ## Overview
//!
//! - **Session management**: one login shell at a time, replaced on respawn,
//!   reclaimed a few seconds after the last viewer leaves
//! - **Viewer transport**: `/ws/terminal/{id}` WebSocket endpoint, raw output
//!   as binary frames and JSON control messages as text frames
//! - **Control socket**: newline-delimited JSON over a Unix socket for
//!   spawn, resize, kill and stop
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                    Bridge                     │
//! ├───────────────────────────────────────────────┤
//! │  ┌──────────────┐          ┌───────────────┐  │
//! │  │  WebSocket   │          │ Control (IPC) │  │
//! │  │   viewers    │          │    socket     │  │
//! │  └──────┬───────┘          └───────┬───────┘  │
//! │         └──────────┐     ┌─────────┘          │
//! │              ┌─────▼─────▼─────┐              │
//! │              │ Session Manager │              │
//! │              └────────┬────────┘              │
//! │              ┌────────▼────────┐              │
//! │              │  PTY + shell    │              │
//! │              └─────────────────┘              │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Bridge, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut bridge = Bridge::new(config)?;
//!     bridge.start().await?;
//!
//!     bridge.shutdown_token().cancelled().await;
//!     bridge.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod ipc;
pub mod network;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

pub use bridge::{Bridge, BridgeState};
pub use config::Config;
pub use network::{AttachTarget, WsServer};
pub use session::{
    SessionError, SessionId, SessionInfo, SessionManager, SessionSettings, ViewerChannel,
    ViewerHandle, ViewerId,
};
