//! Viewer-facing network transport.

pub mod ws;

pub use ws::{parse_target, AttachTarget, WsServer, TERMINAL_PATH};
