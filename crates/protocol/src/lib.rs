//! # ShellBridge Protocol Library
//!
//! Wire protocol for the per-viewer channel between a browser tab and the
//! ShellBridge daemon.
//!
//! ## Overview
//!
//! Each viewer holds one full-duplex, message-oriented channel (a WebSocket in
//! practice). The channel carries:
//!
//! - **Binary frames**: raw terminal output (shell → viewer) or raw input
//!   (viewer → shell), never transformed
//! - **Text frames**: JSON control messages (`input`, `resize`, `exit`)
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{decode_inbound, Frame, Inbound};
//!
//! let frame = Frame::Text(r#"{"type":"resize","cols":120,"rows":40}"#.to_string());
//! assert_eq!(decode_inbound(&frame), Some(Inbound::Resize { cols: 120, rows: 40 }));
//!
//! // Garbage is dropped rather than reported.
//! assert_eq!(decode_inbound(&Frame::Text("garbage".into())), None);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: JSON control message definitions
//! - [`framing`]: Frame kinds and inbound decoding
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{decode_inbound, Frame, Inbound};
pub use messages::{ShellMessage, ViewerMessage};
