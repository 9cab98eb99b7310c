//! # MQTT Session and Dispatch Core
//!
//! Everything between the operator's buttons and the broker connection: one persistent
//! session, three fixed topics, a gate for outgoing commands and a projection of the
//! incoming speed reading.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and endpoint parsing
//! ├── message_manager.rs  - Raw inbound message representation
//! ├── transport.rs        - Transport trait and the rumqttc implementation
//! ├── session.rs          - Session state machine and observers
//! ├── topics.rs           - Topic table, intents and the router
//! ├── dispatcher.rs       - Command gate
//! ├── telemetry.rs        - Speed projection for the UI
//! └── fake.rs             - Recording transport for tests
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! intent ──► CommandDispatcher ──► TopicRouter::encode ──► Session::send ──► Transport
//! Transport ──► Session::handle_event ──► TopicRouter::decode ──► TelemetryProjector
//! ```
//!
//! All of it is driven from a single task (see [`crate::controller`]), so the session
//! state and the telemetry value only ever have one writer.

pub mod config;
pub mod dispatcher;
pub mod fake;
pub mod message_manager;
pub mod session;
pub mod telemetry;
pub mod topics;
pub mod transport;

pub use dispatcher::{CommandDispatcher, Rejected, Sent};
pub use session::{Session, SessionState};
pub use telemetry::TelemetryProjector;
pub use topics::{CommandIntent, TopicRouter};
