use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::topics::TypedMessage;

/// Holds the latest speed reading and notifies watchers on every accepted value.
///
/// Starts at `0`, so a value of zero does not tell "nothing received yet" apart from a
/// real zero reading.
#[derive(Debug, Clone)]
pub struct TelemetryProjector {
    value: Arc<watch::Sender<i64>>,
}

impl Default for TelemetryProjector {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryProjector {
    pub fn new() -> Self {
        let (value, _) = watch::channel(0);
        Self {
            value: Arc::new(value),
        }
    }

    pub fn on_typed_message(&self, message: &TypedMessage) {
        if let TypedMessage::Telemetry(reading) = *message {
            debug!("Telemetry value {}", reading);
            self.value.send_replace(reading);
        }
    }

    pub fn current_value(&self) -> i64 {
        *self.value.borrow()
    }

    /// Back to the initial value for a new session. Watchers are only woken if it changed.
    pub fn reset(&self) {
        self.value.send_if_modified(|value| {
            let changed = *value != 0;
            *value = 0;
            changed
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.value.subscribe()
    }
}
