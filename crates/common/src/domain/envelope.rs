use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Replay position of a channel, as reported by the Streaming API alongside
/// every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayMarker {
    #[serde(rename = "replayId")]
    pub replay_id: i64,
    #[serde(rename = "createdDate")]
    pub created_date: String,
}

/// The unit of routing: the name of the org a message came from plus the
/// message exactly as it arrived on the Bayeux channel.
///
/// Envelopes are created by the source layer and never mutated downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub org_name: String,
    pub message: Value,
}

impl Envelope {
    pub fn new(org_name: impl Into<String>, message: Value) -> Self {
        Self {
            org_name: org_name.into(),
            message,
        }
    }

    /// The Bayeux channel the message was received on.
    pub fn channel(&self) -> Option<&str> {
        self.message.get("channel").and_then(Value::as_str)
    }

    /// The replay marker carried in `data.event`, if any. Generic
    /// StreamingChannel events published without replay support omit it.
    pub fn replay_marker(&self) -> Option<ReplayMarker> {
        let event = self.message.get("data")?.get("event")?;
        Some(ReplayMarker {
            replay_id: event.get("replayId")?.as_i64()?,
            created_date: event.get("createdDate")?.as_str()?.to_string(),
        })
    }

    /// The document the router evaluates conditions against: the envelope
    /// embedded in a single-element array, so array filter expressions can
    /// select (or reject) the whole message.
    pub fn routing_document(&self) -> Value {
        Value::Array(vec![serde_json::json!({
            "org_name": self.org_name,
            "message": self.message,
        })])
    }
}
