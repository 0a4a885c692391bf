//! Frame kinds carried on a viewer channel.
//!
//! A viewer channel multiplexes two kinds of frames:
//!
//! - **Binary** frames carry raw terminal bytes, unmodified in either
//!   direction.
//! - **Text** frames carry JSON control messages (see [`crate::messages`]).
//!
//! Inbound decoding is deliberately lenient: anything that is not a binary
//! frame or a well-formed control message decodes to `None` and is dropped by
//! the caller without touching session state.

use crate::messages::{ShellMessage, ViewerMessage};

/// A single message on a viewer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Raw terminal bytes.
    Binary(Vec<u8>),
    /// A JSON control message.
    Text(String),
}

impl Frame {
    /// Builds the text frame announcing process exit.
    pub fn exit(code: Option<i32>) -> Self {
        let msg = ShellMessage::exit(code);
        let text = msg
            .to_json()
            .unwrap_or_else(|_| format!(r#"{{"type":"exit","exitCode":{}}}"#, code.unwrap_or(0)));
        Frame::Text(text)
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Binary(data) => data.len(),
            Frame::Text(text) => text.len(),
        }
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded inbound request from a viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Bytes to write to the shell verbatim.
    Input(Vec<u8>),
    /// New terminal dimensions.
    Resize {
        /// Width in columns.
        cols: u16,
        /// Height in rows.
        rows: u16,
    },
}

/// Decodes an inbound frame.
///
/// Returns `None` for malformed JSON, unknown or missing `type`, wrong field
/// types, and zero-sized resize requests.
pub fn decode_inbound(frame: &Frame) -> Option<Inbound> {
    match frame {
        Frame::Binary(data) => Some(Inbound::Input(data.clone())),
        Frame::Text(text) => match ViewerMessage::from_json(text).ok()? {
            ViewerMessage::Input { data } => Some(Inbound::Input(data.into_bytes())),
            ViewerMessage::Resize { cols, rows } if cols > 0 && rows > 0 => {
                Some(Inbound::Resize { cols, rows })
            }
            ViewerMessage::Resize { .. } => None,
        },
    }
}
