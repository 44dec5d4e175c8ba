//! Push frame envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::TopicKey;

/// One frame delivered to live subscribers.
///
/// `event` names the view kind, `topic` echoes the subscribed topic so a
/// multiplexing client can route frames, and `data` carries the snapshot
/// payload exactly as cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub event: String,
    pub topic: String,
    pub data: Value,
}

impl PushEvent {
    pub fn new(topic: &TopicKey, data: Value) -> Self {
        PushEvent {
            event: topic.view.event_name().to_string(),
            topic: topic.to_string(),
            data,
        }
    }

    /// Out-of-band frame for a client command that failed.
    pub fn error(message: impl Into<String>) -> Self {
        PushEvent {
            event: "error".to_string(),
            topic: String::new(),
            data: serde_json::json!({ "message": message.into() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use types::{ChainId, ViewKind};

    #[test]
    fn frames_carry_event_name_and_topic() {
        let topic = TopicKey::chain(ChainId::new("AELF"), ViewKind::Overview);
        let frame = PushEvent::new(&topic, json!({ "tx_count": 7 }));
        assert_eq!(frame.event, "overview");
        assert_eq!(frame.topic, "AELF:overview");
        assert_eq!(frame.data["tx_count"], 7);
    }

    #[test]
    fn merged_frames_use_merged_event_name() {
        let frame = PushEvent::new(&TopicKey::merged(), json!({}));
        assert_eq!(frame.event, "mergedOverview");
        assert_eq!(frame.topic, "merged:overview");
    }

    #[test]
    fn error_frames_carry_the_message() {
        let frame = PushEvent::error("unknown topic");
        assert_eq!(frame.event, "error");
        assert_eq!(frame.data["message"], "unknown topic");
    }
}
