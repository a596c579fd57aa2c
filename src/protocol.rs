//! Device wire messages.
//!
//! Inbound text frames are JSON objects tagged by `type`; binary frames are
//! raw encoded audio and never pass through this module.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};

/// A message sent by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    Listen(ListenMessage),
    Abort(AbortMessage),
    Iot(IotMessage),
    Goodbye(GoodbyeMessage),
    Mcp(DeviceMcpMessage),
}

impl DeviceMessage {
    /// Parse an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] for malformed JSON or an unknown `type`.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| GatewayError::Protocol(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Listen(_) => "listen",
            Self::Abort(_) => "abort",
            Self::Iot(_) => "iot",
            Self::Goodbye(_) => "goodbye",
            Self::Mcp(_) => "mcp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenState {
    Start,
    Stop,
    Text,
    Detect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    #[default]
    Auto,
    Manual,
    Realtime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenMessage {
    pub state: ListenState,
    #[serde(default)]
    pub mode: Option<ListenMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Why the device asked to cancel the current turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    WakeWordDetected,
    #[default]
    #[serde(other)]
    UserInterrupt,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbortMessage {
    #[serde(default)]
    pub reason: Option<AbortReason>,
}

impl AbortMessage {
    pub fn reason(&self) -> AbortReason {
        self.reason.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IotMessage {
    #[serde(default)]
    pub descriptors: Option<Vec<IotDescriptor>>,
    #[serde(default)]
    pub states: Option<Value>,
}

/// A capability description contributed by a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IotDescriptor {
    pub name: String,
    pub description: String,
    pub properties: BTreeMap<String, IotProperty>,
    pub methods: BTreeMap<String, IotMethod>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IotProperty {
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IotMethod {
    pub description: String,
    pub parameters: BTreeMap<String, IotProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoodbyeMessage {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// A JSON-RPC payload from the device's MCP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMcpMessage {
    pub payload: Value,
}

impl DeviceMcpMessage {
    /// Numeric request id of a reply, if the payload carries one.
    pub fn request_id(&self) -> Option<u64> {
        self.payload.get("id").and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    Stop,
    SentenceStart,
}

/// A message sent to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Tts {
        session_id: String,
        state: TtsState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Stt {
        session_id: String,
        text: String,
    },
    Mcp {
        session_id: String,
        payload: Value,
    },
}

impl ServerMessage {
    pub fn tts(session_id: &str, state: TtsState, text: Option<String>) -> Self {
        Self::Tts {
            session_id: session_id.to_owned(),
            state,
            text,
        }
    }

    /// A caption shown while the matching audio plays.
    pub fn caption(session_id: &str, text: impl Into<String>) -> Self {
        Self::tts(session_id, TtsState::SentenceStart, Some(text.into()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
