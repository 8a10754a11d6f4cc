use crate::checks::{Checks, HAS_CONTENT, HAS_SENDER, HAS_TIMESTAMP};
use serde::Deserialize;
use serde_json::Value;

// The shape the broadcast server fans out to every client. Only presence is
// asserted, the server is free to evolve the field types, so everything is
// kept as a raw JSON value.
#[derive(Debug, Clone, Deserialize)]
pub struct Broadcast {
    #[serde(default)]
    pub sender: Option<Value>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl Broadcast {
    // Decoding failures are the caller's signal to log and move on, a
    // malformed payload never records field checks.
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn record_checks(&self, checks: &Checks) {
        checks.record(HAS_SENDER, self.sender.is_some());
        checks.record(HAS_CONTENT, self.content.is_some());
        checks.record(HAS_TIMESTAMP, self.timestamp.is_some());
    }
}
