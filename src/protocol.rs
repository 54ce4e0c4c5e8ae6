// MIT License - Copyright (c) 2026 Peter Wright
// Newline-delimited JSON wire codec

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::constants::{FRAME_TERMINATOR, MAX_PENDING_BYTES, MessageType, STATUS_OK};
use crate::devices::BacklightColor;
use crate::error::Result;

/// Commands the bridge sends to the panel.
///
/// # Wire format
///
/// Every command is one JSON object followed by `\n`:
///
/// ```text
/// {"type":11,"data":{"num":0,"val":1}}
/// {"type":51,"data":{"num":1,"val":true}}
/// {"type":500,"data":"ok","state":200,"msg":""}
/// {"type":52}
/// ```
///
/// Indices are zero-based on the wire; the Command API converts from the
/// human-facing 1-based numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Liveness ping. Carries `data: "ok"`, `state: 200` and an empty `msg`.
    Heartbeat,
    /// Wake the panel screen.
    ScreenWake,
    /// Ask the panel to report all relay states.
    RelayQuery,
    /// Ask the panel to report all backlight states (sent with the
    /// BACKLIGHT_CHANGE code).
    BacklightQuery,
    /// Set the backlight of one button.
    BacklightControl { index: u8, color: BacklightColor },
    /// Switch one relay.
    RelayControl { index: u8, on: bool },
}

impl OutboundCommand {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Heartbeat => MessageType::Heartbeat,
            Self::ScreenWake => MessageType::ScreenWake,
            Self::RelayQuery => MessageType::RelayQuery,
            Self::BacklightQuery => MessageType::BacklightChange,
            Self::BacklightControl { .. } => MessageType::BacklightControl,
            Self::RelayControl { .. } => MessageType::RelayControl,
        }
    }

    /// The `data` payload, if the command has one.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Heartbeat => Some(json!("ok")),
            Self::ScreenWake | Self::RelayQuery | Self::BacklightQuery => None,
            Self::BacklightControl { index, color } => {
                Some(json!({ "num": index, "val": color.value() }))
            }
            Self::RelayControl { index, on } => Some(json!({ "num": index, "val": on })),
        }
    }

    /// The full JSON object sent on the wire.
    pub fn to_json(&self) -> Value {
        let mut msg = json!({ "type": self.message_type().code() });
        if let Some(data) = self.data() {
            msg["data"] = data;
        }
        if matches!(self, Self::Heartbeat) {
            msg["state"] = json!(STATUS_OK);
            msg["msg"] = json!("");
        }
        msg
    }

    /// Serialize to newline-terminated JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(&self.to_json())?;
        bytes.push(FRAME_TERMINATOR);
        Ok(bytes)
    }
}

impl std::fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn default_status() -> i64 {
    STATUS_OK
}

/// One decoded inbound message: `{"type": .., "state": .., "data": ..}`.
///
/// A missing `state` counts as success and a missing `data` as null; the
/// panel omits both on some messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub message_type: i64,
    #[serde(default = "default_status")]
    pub state: i64,
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    /// Whether the frame carries the success status code.
    pub fn is_ok(&self) -> bool {
        self.state == STATUS_OK
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_code(self.message_type)
    }
}

/// Parse one frame of JSON text.
pub fn decode(line: &str) -> Result<InboundFrame> {
    Ok(serde_json::from_str(line)?)
}

/// Split a byte buffer into complete frames on `\n` boundaries.
///
/// Complete lines are trimmed and empty ones dropped. Bytes after the last
/// terminator are appended to `leftover`. Invalid UTF-8 is replaced rather
/// than rejected.
pub fn split_frames(data: &[u8], leftover: &mut Vec<u8>) -> Vec<String> {
    let mut frames = Vec::new();
    let mut start = 0;

    for (i, &byte) in data.iter().enumerate() {
        if byte == FRAME_TERMINATOR {
            let line = String::from_utf8_lossy(&data[start..i]);
            let line = line.trim();
            if !line.is_empty() {
                frames.push(line.to_string());
            }
            start = i + 1;
        }
    }

    if start < data.len() {
        leftover.extend_from_slice(&data[start..]);
    }

    frames
}

/// Reassembles frames that arrive split across socket reads.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes and return every frame they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);
        let frames = split_frames(&data, &mut self.pending);

        if self.pending.len() > MAX_PENDING_BYTES {
            warn!(
                "Discarding {} bytes of unterminated data from panel",
                self.pending.len()
            );
            self.pending.clear();
        }

        frames
    }

    /// Bytes of the trailing partial frame.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}
