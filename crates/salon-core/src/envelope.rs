//! The `{message, username}` envelope exchanged with clients after
//! authentication, and the codec that turns raw text frames into envelopes.
//!
//! Decoding never fails: anything that is not a JSON object is relayed as
//! the literal message text under the sender's username.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Username used when a client does not provide one.
pub const ANONYMOUS_USERNAME: &str = "Anonyme";

/// Username carried by server-generated join/leave notices.
pub const SYSTEM_USERNAME: &str = "système";

/// One chat message as delivered to every member of a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: String,
    #[serde(default = "anonymous")]
    pub username: String,
}

fn anonymous() -> String {
    ANONYMOUS_USERNAME.to_string()
}

impl Envelope {
    pub fn new(message: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            username: username.into(),
        }
    }

    /// System notice broadcast when `username` joins a room.
    pub fn joined(username: &str) -> Self {
        Self::new(format!("{username} a rejoint la salle"), SYSTEM_USERNAME)
    }

    /// System notice broadcast when `username` leaves a room.
    pub fn left(username: &str) -> Self {
        Self::new(format!("{username} a quitté la salle"), SYSTEM_USERNAME)
    }

    /// Decode an inbound text frame sent by `sender`.
    ///
    /// - JSON object: `message` field (string as-is, absent/null as `""`,
    ///   any other value as its compact JSON text) and `username` field when
    ///   it is a string, `sender` otherwise.
    /// - Anything else, including JSON scalars and arrays: the raw text is
    ///   the message and `sender` the username.
    pub fn decode(raw: &str, sender: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(mut fields)) => {
                let message = match fields.remove("message") {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                };
                let username = match fields.remove("username") {
                    Some(Value::String(s)) => s,
                    _ => sender.to_string(),
                };
                Self { message, username }
            }
            _ => Self::new(raw, sender),
        }
    }

    /// Encode as the JSON text sent to clients.
    pub fn encode(&self) -> String {
        serde_json::json!({
            "message": self.message,
            "username": self.username,
        })
        .to_string()
    }
}
