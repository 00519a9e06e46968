use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RelayError, Result};

/// `type` tag carried by every frequency frame
pub const FRAME_TYPE: &str = "fft";

/// Number of frequency bands the producer sends by default
pub const DEFAULT_BANDS: usize = 64;

/// Messages exchanged over the relay, tagged by `type`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Frequency frame (source → viewers)
    #[serde(rename = "fft")]
    Frame(FrequencyFrame),

    /// Relay status (relay → viewer)
    #[serde(rename = "status")]
    Status(StatusUpdate),
}

/// One broadcast unit: band amplitudes (0-255) plus capture time
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrequencyFrame {
    pub frequencies: Vec<u8>,
    pub timestamp: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub message: String,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewers: Option<usize>,
}

impl StatusUpdate {
    /// First message every admitted viewer receives
    pub fn welcome(source_connected: bool, viewers: usize) -> Self {
        Self {
            message: "Connected to audio stream".to_string(),
            connected: source_connected,
            viewers: Some(viewers),
        }
    }

    pub fn streaming() -> Self {
        Self {
            message: "Bot is streaming".to_string(),
            connected: true,
            viewers: None,
        }
    }

    pub fn source_lost() -> Self {
        Self {
            message: "Bot disconnected".to_string(),
            connected: false,
            viewers: None,
        }
    }
}

impl WireMessage {
    /// Encode as a WebSocket text message
    pub fn to_message(&self) -> Result<Message> {
        let json = serde_json::to_string(self)?;
        Ok(Message::Text(json.into()))
    }
}

impl From<StatusUpdate> for WireMessage {
    fn from(status: StatusUpdate) -> Self {
        WireMessage::Status(status)
    }
}

impl From<FrequencyFrame> for WireMessage {
    fn from(frame: FrequencyFrame) -> Self {
        WireMessage::Frame(frame)
    }
}

/// Raw payload of a data message, `None` for control frames
pub fn payload_of(message: &Message) -> Option<&[u8]> {
    match message {
        Message::Text(text) => Some(text.as_str().as_bytes()),
        Message::Binary(bytes) => Some(bytes.as_ref()),
        _ => None,
    }
}

/// Check that a source payload has the shape of a frequency frame.
///
/// Only the envelope is checked (`type == "fft"` and an array of
/// frequencies); band values are passed through untouched. Returns the
/// number of bands.
pub fn validate_frame(payload: &[u8]) -> Result<usize> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| RelayError::MalformedFrame(format!("invalid JSON: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| RelayError::MalformedFrame("expected a JSON object".to_string()))?;

    match object.get("type").and_then(Value::as_str) {
        Some(FRAME_TYPE) => {}
        Some(other) => {
            return Err(RelayError::MalformedFrame(format!(
                "unexpected message type {:?}",
                other
            )))
        }
        None => return Err(RelayError::MalformedFrame("missing message type".to_string())),
    }

    object
        .get("frequencies")
        .and_then(Value::as_array)
        .map(Vec::len)
        .ok_or_else(|| RelayError::MalformedFrame("frequencies is not an array".to_string()))
}
