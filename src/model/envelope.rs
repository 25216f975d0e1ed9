use serde::{Deserialize, Serialize};

/// Message written to a client's data channel.
///
/// Serialises as an indented JSON object with `event` before `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub payload: String,
}

impl EventEnvelope {
    pub fn new(event: &str, payload: &str) -> EventEnvelope {
        Self {
            event: event.to_string(),
            payload: payload.to_string(),
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_text(text: &str) -> serde_json::Result<EventEnvelope> {
        serde_json::from_str(text)
    }
}
