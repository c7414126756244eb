//! Registration protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration protocol version for compatibility checking
pub const REGISTRATION_PROTOCOL_VERSION: u32 = 1;

/// Messages sent from worker processes to the master.
///
/// A worker reports exactly one of these per message; the master never
/// pushes commands back over this channel. Exit requests travel as OS
/// signals, not registration messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistrationMessage {
    /// Worker finished loading its servable and can serve
    Ready { worker_key: String },

    /// Periodic liveness report
    Heartbeat { worker_key: String },

    /// Worker is alive but cannot serve and wants to be replaced
    Unavailable {
        worker_key: String,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Worker hit a fatal condition before or during startup
    Error { worker_key: String, message: String },
}

impl RegistrationMessage {
    /// Key of the worker this message refers to
    pub fn worker_key(&self) -> &str {
        match self {
            RegistrationMessage::Ready { worker_key }
            | RegistrationMessage::Heartbeat { worker_key }
            | RegistrationMessage::Unavailable { worker_key, .. }
            | RegistrationMessage::Error { worker_key, .. } => worker_key,
        }
    }
}

/// Message envelope for all registration traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: REGISTRATION_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == REGISTRATION_PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_tagging() {
        let message = RegistrationMessage::Unavailable {
            worker_key: "resnet_1_0".to_string(),
            reason: Some("device lost".to_string()),
        };

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"unavailable\""));

        let parsed: RegistrationMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_worker_key_accessor() {
        let message = RegistrationMessage::Ready {
            worker_key: "add_1_2".to_string(),
        };
        assert_eq!(message.worker_key(), "add_1_2");
    }

    #[test]
    fn test_envelope_version() {
        let envelope = MessageEnvelope::new(RegistrationMessage::Heartbeat {
            worker_key: "w".to_string(),
        });
        assert_eq!(envelope.protocol_version, REGISTRATION_PROTOCOL_VERSION);
        assert!(envelope.is_compatible());

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: MessageEnvelope<RegistrationMessage> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.protocol_version, envelope.protocol_version);
    }
}
