//! Wire protocol for push channels
//!
//! Inbound frames are JSON objects tagged with an `action` field. They are
//! decoded into the closed [`ControlMessage`] enum; anything that does not
//! match a known action with its required fields is rejected with a
//! [`ProtocolError`]. Outbound payloads are built from [`Outbound`].

use crate::models::MessageRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Generic client-facing rejection text
pub const INVALID_REQUEST: &str = "Invalid request";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not a JSON object: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("invalid {action} fields: {source}")]
    InvalidFields {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{action} field `{field}` must not be empty")]
    EmptyField {
        action: &'static str,
        field: &'static str,
    },
}

impl ProtocolError {
    /// Text placed in the `error` field of the ERROR payload
    pub fn client_message(&self) -> String {
        match self {
            ProtocolError::Malformed(_) | ProtocolError::UnknownAction(_) => {
                INVALID_REQUEST.to_string()
            }
            ProtocolError::InvalidFields { source, .. } => {
                format!("{}: {}", INVALID_REQUEST, source)
            }
            ProtocolError::EmptyField { field, .. } => {
                format!("{}: `{}` must not be empty", INVALID_REQUEST, field)
            }
        }
    }
}

/// Query parameters supplied when a channel is opened (the CONNECT action).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "connectionType", default)]
    pub connection_type: String,
    /// Expected partner; may be empty
    #[serde(default)]
    pub sub: String,
    /// Self-declared owner. Must agree with the authorized subject when present.
    #[serde(rename = "selfSub")]
    pub self_sub: Option<String>,
    /// Bearer credential for clients that cannot set headers on upgrade
    #[serde(rename = "Authorizer")]
    pub authorizer: Option<String>,
}

impl ConnectParams {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        require("CONNECT", "connectionType", &self.connection_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageFields {
    pub message: String,
    pub timestamp: i64,
    pub from_sub: String,
    pub to_sub: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesFields {
    pub from_sub: String,
    pub to_sub: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GreetingFields {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFields {
    pub partner_sub: String,
}

/// A validated inbound control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Ping,
    SendMessage(SendMessageFields),
    GetMessages(GetMessagesFields),
    Greeting(GreetingFields),
    Status(StatusFields),
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match action.as_str() {
            "PING" => Ok(ControlMessage::Ping),
            "SENDMSG" => {
                let fields: SendMessageFields = fields("SENDMSG", value)?;
                require("SENDMSG", "fromSub", &fields.from_sub)?;
                require("SENDMSG", "toSub", &fields.to_sub)?;
                Ok(ControlMessage::SendMessage(fields))
            }
            "GETMSG" => {
                let fields: GetMessagesFields = fields("GETMSG", value)?;
                require("GETMSG", "fromSub", &fields.from_sub)?;
                require("GETMSG", "toSub", &fields.to_sub)?;
                Ok(ControlMessage::GetMessages(fields))
            }
            "GREETING" => Ok(ControlMessage::Greeting(fields("GREETING", value)?)),
            "STATUS" => {
                let fields: StatusFields = fields("STATUS", value)?;
                require("STATUS", "partnerSub", &fields.partner_sub)?;
                Ok(ControlMessage::Status(fields))
            }
            _ => Err(ProtocolError::UnknownAction(action)),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            ControlMessage::Ping => "PING",
            ControlMessage::SendMessage(_) => "SENDMSG",
            ControlMessage::GetMessages(_) => "GETMSG",
            ControlMessage::Greeting(_) => "GREETING",
            ControlMessage::Status(_) => "STATUS",
        }
    }
}

fn fields<T: serde::de::DeserializeOwned>(
    action: &'static str,
    value: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidFields { action, source })
}

fn require(action: &'static str, field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        Err(ProtocolError::EmptyField { action, field })
    } else {
        Ok(())
    }
}

/// Payloads pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum Outbound {
    #[serde(rename = "PONG")]
    Pong { value: String },
    #[serde(rename = "ISONLINE")]
    IsOnline { value: String },
    #[serde(rename = "PARTNERINFO")]
    PartnerInfo { value: String },
    #[serde(rename = "SENDMSG")]
    Message {
        message: String,
        #[serde(rename = "fromSub")]
        from_sub: String,
        #[serde(rename = "toSub")]
        to_sub: String,
        timestamp: i64,
    },
    #[serde(rename = "GETMSG")]
    History { messages: Vec<MessageRecord> },
    #[serde(rename = "GREETING")]
    Greeting { value: String },
    #[serde(rename = "ERROR")]
    Error { error: String },
}

impl Outbound {
    pub fn pong() -> Self {
        Outbound::Pong {
            value: "PONG".to_string(),
        }
    }

    pub fn presence(online: bool) -> Self {
        Outbound::IsOnline {
            value: if online { "1" } else { "0" }.to_string(),
        }
    }

    pub fn partner_info(username: impl Into<String>) -> Self {
        Outbound::PartnerInfo {
            value: username.into(),
        }
    }

    pub fn greeting(message: impl Into<String>) -> Self {
        Outbound::Greeting {
            value: message.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Outbound::Error {
            error: error.into(),
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
