//! Wire protocol between the relay server and its clients.
//!
//! Frames are UTF-8 JSON objects tagged by a `type` field:
//! ```json
//! { "type": "draw", "fromX": 0, "fromY": 0, "toX": 10, "toY": 10, "color": "#000", "size": 5 }
//! { "type": "cursor", "x": 100, "y": 200 }
//! { "type": "clear" }
//! ```
//!
//! The server answers with `user_connected`, `draw`, `cursor`, `clear` and
//! `user_count` frames; see [`ServerMessage`].

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::drawing_log::StrokeSegment;
use crate::identity::{UserColor, UserId};

/// Errors decoding or encoding protocol frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Message is not a JSON object")]
    NotAnObject,
    #[error("Invalid stroke size: {0}")]
    InvalidSize(f64),
}

/// A line segment as submitted by a client, before attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawCommand {
    pub from_x: f64,
    pub from_y: f64,
    pub to_x: f64,
    pub to_y: f64,
    pub color: String,
    /// Browsers send the brush slider value as a string once it has been moved.
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub size: f64,
}

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Draw one stroke segment
    Draw(DrawCommand),
    /// Wipe the shared canvas
    Clear,
    /// Pointer position in canvas coordinates
    Cursor { x: f64, y: f64 },
    /// A message type this build does not understand
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Decode and validate one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        let message: Self = serde_json::from_value(value)?;
        if let Self::Draw(command) = &message {
            if !command.size.is_finite() || command.size <= 0.0 {
                return Err(ProtocolError::InvalidSize(command.size));
            }
        }
        Ok(message)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once to a new connection with its identity and the full drawing
    #[serde(rename_all = "camelCase")]
    UserConnected {
        user_id: UserId,
        user_color: UserColor,
        drawing_data: Vec<StrokeSegment>,
    },
    /// A stroke segment drawn by another user
    Draw(StrokeSegment),
    /// Another user wiped the canvas
    Clear,
    /// Another user's pointer moved
    #[serde(rename_all = "camelCase")]
    Cursor {
        user_id: UserId,
        user_color: UserColor,
        x: f64,
        y: f64,
    },
    /// Number of connected users changed
    UserCount { count: usize },
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(f64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
