//! JSON control messages exchanged with viewers.
//!
//! Control messages travel as text frames on the same channel that carries
//! raw terminal bytes as binary frames. Every message is a JSON object with a
//! `type` discriminator.
//!
//! | Direction | Message |
//! |---|---|
//! | viewer → shell | `{"type":"input","data":"ls\r"}` |
//! | viewer → shell | `{"type":"resize","cols":120,"rows":40}` |
//! | shell → viewer | `{"type":"exit","exitCode":0}` |

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Control messages sent by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewerMessage {
    /// Literal interactive input.
    Input {
        /// Text written verbatim to the shell.
        data: String,
    },
    /// Terminal dimension change.
    Resize {
        /// New width in columns.
        cols: u16,
        /// New height in rows.
        rows: u16,
    },
}

impl ViewerMessage {
    /// Parses a text frame into a viewer message.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Control messages sent to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShellMessage {
    /// The shell process terminated.
    Exit {
        /// Process exit code, `0` when the real status is unavailable.
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },
}

impl ShellMessage {
    /// Builds an exit notification.
    ///
    /// An unknown status is reported as `0`, so viewers cannot tell a clean
    /// exit from an unavailable one.
    pub fn exit(code: Option<i32>) -> Self {
        ShellMessage::Exit {
            exit_code: code.unwrap_or(0),
        }
    }

    /// Serializes the message to its JSON text form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
