use chrono::NaiveDateTime;
use std::fmt;

const PREVIEW_CHARS: usize = 10;

/// Raw inbound publish as it came off the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MQTTMessage {
    topic: String,
    content: String,
    timestamp: NaiveDateTime,
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.content.chars().take(PREVIEW_CHARS).collect();
        write!(f, "{} - {}: {}", self.timestamp, self.topic, preview)
    }
}

impl MQTTMessage {
    pub fn from_topic(topic: impl Into<String>, content: impl Into<String>) -> Self {
        MQTTMessage {
            topic: topic.into(),
            content: content.into(),
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    /// Payload bytes that are not UTF-8 are replaced, which later fails any decode.
    pub fn from_bytes(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self::from_topic(topic, String::from_utf8_lossy(payload).into_owned())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}
