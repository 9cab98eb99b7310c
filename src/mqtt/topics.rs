//! Topic table and the mapping between operator intents and wire messages.
//!
//! The client knows exactly three topics. Two carry commands towards the car and are
//! only ever published, the third carries the speed reading and is the only one the
//! client subscribes to.
//!
//! ```text
//! CommandIntent ──encode──► Command { topic, payload } ──► broker
//! broker ──► (topic, payload) ──decode──► TypedMessage | Unrecognized
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub const ACTUATOR_TOPIC: &str = "home/led";
pub const ALERT_TOPIC: &str = "home/buzzer";
pub const TELEMETRY_TOPIC: &str = "home/speed";

const PAYLOAD_ON: &str = "on";
const PAYLOAD_OFF: &str = "off";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Actuator,
    Alert,
    Telemetry,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Actuator, Topic::Alert, Topic::Telemetry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Actuator => ACTUATOR_TOPIC,
            Topic::Alert => ALERT_TOPIC,
            Topic::Telemetry => TELEMETRY_TOPIC,
        }
    }

    pub fn from_wire(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == topic)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four things an operator can ask the car to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandIntent {
    ActuatorOn,
    ActuatorOff,
    AlertOn,
    AlertOff,
}

impl CommandIntent {
    pub const ALL: [CommandIntent; 4] = [
        CommandIntent::ActuatorOn,
        CommandIntent::ActuatorOff,
        CommandIntent::AlertOn,
        CommandIntent::AlertOff,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CommandIntent::ActuatorOn => "actuator-on",
            CommandIntent::ActuatorOff => "actuator-off",
            CommandIntent::AlertOn => "alert-on",
            CommandIntent::AlertOff => "alert-off",
        }
    }

    fn topic(&self) -> Topic {
        match self {
            CommandIntent::ActuatorOn | CommandIntent::ActuatorOff => Topic::Actuator,
            CommandIntent::AlertOn | CommandIntent::AlertOff => Topic::Alert,
        }
    }

    fn switches_on(&self) -> bool {
        matches!(self, CommandIntent::ActuatorOn | CommandIntent::AlertOn)
    }
}

impl fmt::Display for CommandIntent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("Unknown command intent: {0}")]
    UnknownIntent(String),
}

impl FromStr for CommandIntent {
    type Err = IntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|intent| intent.name() == s)
            .ok_or_else(|| IntentError::UnknownIntent(s.to_string()))
    }
}

/// How the alert line on the car reacts to the `on` payload.
///
/// Some boards drive the buzzer low, so switching it on means publishing `off`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertPolarity {
    #[default]
    ActiveHigh,
    ActiveLow,
}

/// Wire level command, ready to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub topic: Topic,
    pub payload: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedMessage {
    Telemetry(i64),
    Command(CommandIntent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Message(TypedMessage),
    Unrecognized,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TopicRouter {
    alert_polarity: AlertPolarity,
}

impl TopicRouter {
    pub fn new(alert_polarity: AlertPolarity) -> Self {
        Self { alert_polarity }
    }

    pub fn encode(&self, intent: CommandIntent) -> Command {
        let topic = intent.topic();
        let high = self.line_level(topic, intent.switches_on());
        Command {
            topic,
            payload: if high { PAYLOAD_ON } else { PAYLOAD_OFF },
        }
    }

    pub fn decode(&self, topic: &str, raw: &str) -> Decoded {
        let decoded = match Topic::from_wire(topic) {
            Some(Topic::Telemetry) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .map(TypedMessage::Telemetry),
            Some(topic) => {
                let high = match raw {
                    PAYLOAD_ON => Some(true),
                    PAYLOAD_OFF => Some(false),
                    _ => None,
                };
                high.map(|high| {
                    let on = self.line_level(topic, high);
                    TypedMessage::Command(match (topic, on) {
                        (Topic::Alert, true) => CommandIntent::AlertOn,
                        (Topic::Alert, false) => CommandIntent::AlertOff,
                        (_, true) => CommandIntent::ActuatorOn,
                        (_, false) => CommandIntent::ActuatorOff,
                    })
                })
            }
            None => None,
        };

        match decoded {
            Some(message) => Decoded::Message(message),
            None => {
                debug!("Discarding unrecognized message on {}: {:?}", topic, raw);
                Decoded::Unrecognized
            }
        }
    }

    /// Topics subscribed as soon as a session is connected. Command topics are publish-only.
    pub fn always_subscribed(&self) -> &'static [Topic] {
        &[Topic::Telemetry]
    }

    // Inversion is its own inverse, so this maps both ways.
    fn line_level(&self, topic: Topic, level: bool) -> bool {
        match (topic, self.alert_polarity) {
            (Topic::Alert, AlertPolarity::ActiveLow) => !level,
            _ => level,
        }
    }
}
