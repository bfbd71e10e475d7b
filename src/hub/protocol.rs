use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol name announced in the handshake
pub const PROTOCOL_NAME: &str = "json";
/// Protocol version announced in the handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// Record kind, carried on the wire as the numeric `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageKind {
    /// Client call, also used by the server for broadcasts
    Invocation,
    StreamItem,
    /// Acknowledgement of a client call
    Completion,
    StreamInvocation,
    CancelInvocation,
    Ping,
    /// Server-initiated close, possibly with an error
    Close,
    Other(u8),
}

impl From<u8> for MessageKind {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Invocation,
            2 => Self::StreamItem,
            3 => Self::Completion,
            4 => Self::StreamInvocation,
            5 => Self::CancelInvocation,
            6 => Self::Ping,
            7 => Self::Close,
            other => Self::Other(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Invocation => 1,
            MessageKind::StreamItem => 2,
            MessageKind::Completion => 3,
            MessageKind::StreamInvocation => 4,
            MessageKind::CancelInvocation => 5,
            MessageKind::Ping => 6,
            MessageKind::Close => 7,
            MessageKind::Other(code) => code,
        }
    }
}

/// First record sent on a fresh transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }
    }
}

/// One decoded hub record
///
/// Every field is optional; a record with neither `kind` nor `target` is
/// the handshake acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProtocolMessage {
    /// Client call expecting an acknowledgement for `invocation_id`
    pub fn invocation(
        invocation_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            arguments: Some(arguments),
            invocation_id: Some(invocation_id.into()),
            target: Some(target.into()),
            kind: Some(MessageKind::Invocation),
            ..Self::default()
        }
    }

    pub fn ping() -> Self {
        Self {
            kind: Some(MessageKind::Ping),
            ..Self::default()
        }
    }

    pub fn completion(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: Some(invocation_id.into()),
            kind: Some(MessageKind::Completion),
            ..Self::default()
        }
    }

    /// Server broadcast on `target`
    pub fn broadcast(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            arguments: Some(arguments),
            target: Some(target.into()),
            kind: Some(MessageKind::Invocation),
            ..Self::default()
        }
    }

    pub const fn is_handshake_ack(&self) -> bool {
        self.kind.is_none() && self.target.is_none()
    }

    /// A broadcast is a server call that does not expect an acknowledgement
    pub const fn is_broadcast(&self) -> bool {
        matches!(self.kind, Some(MessageKind::Invocation))
            && self.target.is_some()
            && self.invocation_id.is_none()
    }

    pub fn arguments(&self) -> &[Value] {
        self.arguments.as_deref().unwrap_or_default()
    }
}
