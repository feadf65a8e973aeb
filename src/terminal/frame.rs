//! Inbound control frames
//!
//! Viewers send raw bytes (binary WebSocket frames), plain text keystrokes,
//! or tagged JSON text frames:
//!
//! ```text
//! {"kind":"data","data":"ls\r"}
//! {"kind":"interrupt"}
//! ```
//!
//! Text that is not a control frame is forwarded as typed. Everything
//! decodes into [`InputFrame`] before it reaches the broker.

use bytes::Bytes;
use serde::Deserialize;

use crate::error::StreamError;

/// Byte written to the process for an interrupt (Ctrl-C)
pub const INTERRUPT_BYTE: u8 = 0x03;

/// Input destined for a session's process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFrame {
    Data(Bytes),
    Interrupt,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireFrame {
    Data { data: String },
    Interrupt,
}

impl InputFrame {
    /// Decode a JSON text frame
    pub fn from_text(text: &str) -> Result<Self, StreamError> {
        let wire: WireFrame = serde_json::from_str(text)
            .map_err(|e| StreamError::Transport(format!("malformed control frame: {}", e)))?;

        Ok(match wire {
            WireFrame::Data { data } => InputFrame::Data(Bytes::from(data)),
            WireFrame::Interrupt => InputFrame::Interrupt,
        })
    }

    /// Decode a text frame: a control frame when it parses as one, typed
    /// input otherwise
    pub fn from_text_or_raw(text: &str) -> Self {
        Self::from_text(text)
            .unwrap_or_else(|_| InputFrame::Data(Bytes::copy_from_slice(text.as_bytes())))
    }

    /// Bytes to write to the process
    pub fn into_bytes(self) -> Bytes {
        match self {
            InputFrame::Data(bytes) => bytes,
            InputFrame::Interrupt => Bytes::from_static(&[INTERRUPT_BYTE]),
        }
    }
}

impl From<Bytes> for InputFrame {
    fn from(bytes: Bytes) -> Self {
        InputFrame::Data(bytes)
    }
}
