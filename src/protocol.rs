//! Wire format of the command channel.
//!
//! One UTF-8 JSON object per connection, no framing beyond the peer closing
//! its write side. The channel never answers: delivery is fire-and-forget.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Jump,
    Message,
    Accessory,
    Close,
}

/// The JSON object exactly as it travels over the socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessory: Option<i64>,
}

/// Commands that reach the behavior engine through the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Jump,
    ShowMessage { text: String },
    /// Raw wire index; clamped against the catalog when applied.
    SetAccessory { index: i64 },
}

/// Everything the channel can receive. `Close` never enters the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelCommand {
    Queued(Command),
    Close,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message command requires text")]
    MissingText,
}

impl WireMessage {
    pub fn jump() -> Self {
        Self {
            method: Method::Jump,
            message: None,
            accessory: None,
        }
    }

    pub fn close() -> Self {
        Self {
            method: Method::Close,
            message: None,
            accessory: None,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self {
            method: Method::Message,
            message: Some(text.into()),
            accessory: None,
        }
    }

    pub fn accessory(index: i64) -> Self {
        Self {
            method: Method::Accessory,
            message: None,
            accessory: Some(index),
        }
    }

    pub fn validate(self) -> Result<ChannelCommand, ProtocolError> {
        match self.method {
            Method::Jump => Ok(ChannelCommand::Queued(Command::Jump)),
            Method::Close => Ok(ChannelCommand::Close),
            Method::Message => {
                let text = self.message.ok_or(ProtocolError::MissingText)?;
                Ok(ChannelCommand::Queued(Command::ShowMessage { text }))
            }
            Method::Accessory => Ok(ChannelCommand::Queued(Command::SetAccessory {
                index: self.accessory.unwrap_or(0),
            })),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Parse and validate a complete connection payload.
pub fn decode(bytes: &[u8]) -> Result<ChannelCommand, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
    let wire: WireMessage = serde_json::from_str(text.trim())?;
    wire.validate()
}
