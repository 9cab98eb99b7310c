//! Lifecycle of the one broker session the client holds.
//!
//! ```text
//! Idle ──► Connecting ──► Connected ──► Disconnecting ──► Closed
//!   │          │              │               │
//!   └──────────┴──────────────┴───────────────┴────────► Errored
//! ```
//!
//! `Closed` and `Errored` end a session. `connect()` from `Idle`, `Closed` or `Errored`
//! starts a new one with a fresh session id; nothing reconnects on its own.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, error, info, warn};

use super::config::Endpoint;
use super::message_manager::MQTTMessage;
use super::topics::{Topic, TopicRouter};
use super::transport::{SessionId, Transport, TransportError, TransportEvent, TransportEventKind};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Closed,
    Errored,
}

impl SessionState {
    /// A connection attempt or connection exists.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Disconnecting
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Disconnecting => "Disconnecting",
            SessionState::Closed => "Closed",
            SessionState::Errored => "Errored",
        };
        f.write_str(name)
    }
}

pub type StateObserver = Box<dyn FnMut(SessionState) + Send>;
pub type MessageObserver = Box<dyn FnMut(&MQTTMessage) + Send>;

pub struct Session {
    state: SessionState,
    session_id: SessionId,
    subscriptions: HashSet<Topic>,
    always_subscribed: Vec<Topic>,
    transport: Box<dyn Transport>,
    state_observers: Vec<StateObserver>,
    message_observers: Vec<MessageObserver>,
}

impl Session {
    pub fn new(transport: Box<dyn Transport>, router: &TopicRouter) -> Self {
        Self {
            state: SessionState::Idle,
            session_id: 0,
            subscriptions: HashSet::new(),
            always_subscribed: router.always_subscribed().to_vec(),
            transport,
            state_observers: Vec::new(),
            message_observers: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn subscriptions(&self) -> &HashSet<Topic> {
        &self.subscriptions
    }

    /// Observers are called in registration order on every state change.
    pub fn on_state_change(&mut self, observer: impl FnMut(SessionState) + Send + 'static) {
        self.state_observers.push(Box::new(observer));
    }

    /// Observers are called in registration order for every message received while connected.
    pub fn on_message(&mut self, observer: impl FnMut(&MQTTMessage) + Send + 'static) {
        self.message_observers.push(Box::new(observer));
    }

    /// Starts a new session. Failures end up as `Errored`, never as a return value.
    pub fn connect(&mut self, endpoint: Endpoint) {
        if self.state.is_active() {
            debug!(
                "Connect to {} ignored, session {} is {}",
                endpoint, self.session_id, self.state
            );
            return;
        }

        self.session_id += 1;
        self.subscriptions.clear();
        info!("Starting session {} towards {}", self.session_id, endpoint);
        self.set_state(SessionState::Connecting);

        if let Err(e) = self.transport.open(&endpoint, self.session_id) {
            error!("Session {}: {}", self.session_id, e);
            self.end(SessionState::Errored);
        }
    }

    pub fn disconnect(&mut self) {
        match self.state {
            SessionState::Connecting | SessionState::Connected => {
                info!("Disconnecting session {}", self.session_id);
                self.set_state(SessionState::Disconnecting);
                if self.transport.close().is_err() {
                    self.end(SessionState::Closed);
                }
            }
            SessionState::Disconnecting => {
                debug!("Session {} is already disconnecting", self.session_id);
            }
            state => debug!("Disconnect ignored, no active session ({})", state),
        }
    }

    /// Publishes when connected; otherwise logs and does nothing.
    pub fn send(&mut self, topic: Topic, payload: &str) -> Result<(), TransportError> {
        if self.state != SessionState::Connected {
            warn!(
                "Not sending {} to {}: session is {}",
                payload, topic, self.state
            );
            return Err(TransportError::NotConnected);
        }

        self.transport
            .publish(topic.as_str(), payload)
            .inspect(|_| info!("Published {} to {}", payload, topic))
            .inspect_err(|e| warn!("Publishing {} to {} failed: {}", payload, topic, e))
    }

    /// Applies one transport event. Events from earlier sessions are dropped.
    pub fn handle_event(&mut self, event: TransportEvent) {
        if event.session_id != self.session_id {
            debug!(
                "Dropping event from stale session {} (current {})",
                event.session_id, self.session_id
            );
            return;
        }

        match event.kind {
            TransportEventKind::Connected => {
                if self.state == SessionState::Connecting {
                    info!("Session {} connected", self.session_id);
                    self.set_state(SessionState::Connected);
                    self.subscribe_always();
                } else {
                    debug!("Ignoring connect confirmation while {}", self.state);
                }
            }
            TransportEventKind::Message(message) => {
                if self.state != SessionState::Connected {
                    debug!("Dropping message on {} while {}", message.topic(), self.state);
                    return;
                }
                for observer in self.message_observers.iter_mut() {
                    observer(&message);
                }
            }
            TransportEventKind::Closed => {
                if !self.state.is_terminal() {
                    info!("Session {} closed", self.session_id);
                    self.end(SessionState::Closed);
                }
            }
            TransportEventKind::Error(reason) => match self.state {
                SessionState::Disconnecting => {
                    debug!("Transport ended during disconnect: {}", reason);
                    self.end(SessionState::Closed);
                }
                state if state.is_terminal() => {
                    debug!("Ignoring transport error after session end: {}", reason);
                }
                _ => {
                    error!("Session {} failed: {}", self.session_id, reason);
                    self.end(SessionState::Errored);
                }
            },
        }
    }

    fn subscribe_always(&mut self) {
        for topic in self.always_subscribed.clone() {
            if let Err(e) = self.transport.subscribe(topic.as_str()) {
                error!("Subscribing to {} failed: {}", topic, e);
                self.end(SessionState::Errored);
                return;
            }
            self.subscriptions.insert(topic);
        }
    }

    fn end(&mut self, state: SessionState) {
        self.transport.release();
        self.subscriptions.clear();
        self.set_state(state);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!("Session state {} -> {}", self.state, state);
        self.state = state;
        for observer in self.state_observers.iter_mut() {
            observer(state);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state.is_active() {
            debug!("Releasing session {} on drop", self.session_id);
        }
        self.transport.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::fake::{FakeTransport, TransportCall};
    use crate::mqtt::topics::TELEMETRY_TOPIC;
    use std::sync::{Arc, Mutex};

    fn endpoint() -> Endpoint {
        "ws://broker.test:8080/mqtt".parse().unwrap()
    }

    fn session() -> (Session, FakeTransport) {
        let fake = FakeTransport::new();
        let session = Session::new(Box::new(fake.clone()), &TopicRouter::default());
        (session, fake)
    }

    fn record_states(session: &mut Session) -> Arc<Mutex<Vec<SessionState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.on_state_change(move |state| sink.lock().unwrap().push(state));
        seen
    }

    fn event(session: &Session, kind: TransportEventKind) -> TransportEvent {
        TransportEvent::new(session.session_id(), kind)
    }

    #[test]
    fn connect_confirmation_subscribes_telemetry() {
        let (mut session, fake) = session();
        let states = record_states(&mut session);

        session.connect(endpoint());
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.subscriptions().is_empty());

        session.handle_event(event(&session, TransportEventKind::Connected));
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.subscriptions().contains(&Topic::Telemetry));
        assert_eq!(
            fake.calls(),
            vec![
                TransportCall::Open {
                    endpoint: "ws://broker.test:8080/mqtt".to_string(),
                    session_id: 1
                },
                TransportCall::Subscribe(TELEMETRY_TOPIC.to_string()),
            ]
        );
        assert_eq!(
            *states.lock().unwrap(),
            vec![SessionState::Connecting, SessionState::Connected]
        );
    }

    #[test]
    fn open_failure_becomes_errored() {
        let (mut session, fake) = session();
        fake.fail_open(true);
        let states = record_states(&mut session);

        session.connect(endpoint());

        assert_eq!(session.state(), SessionState::Errored);
        assert_eq!(
            *states.lock().unwrap(),
            vec![SessionState::Connecting, SessionState::Errored]
        );
        assert_eq!(fake.calls(), vec![TransportCall::Release]);
    }

    #[test]
    fn send_outside_connected_is_a_noop() {
        let (mut session, fake) = session();
        assert_eq!(
            session.send(Topic::Actuator, "on"),
            Err(TransportError::NotConnected)
        );
        session.connect(endpoint());
        assert_eq!(
            session.send(Topic::Actuator, "on"),
            Err(TransportError::NotConnected)
        );
        assert!(fake.published().is_empty());
    }

    #[test]
    fn graceful_disconnect_waits_for_close_event() {
        let (mut session, fake) = session();
        session.connect(endpoint());
        session.handle_event(event(&session, TransportEventKind::Connected));

        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnecting);
        assert!(fake.calls().contains(&TransportCall::Close));

        session.handle_event(event(&session, TransportEventKind::Closed));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.subscriptions().is_empty());
        assert_eq!(fake.calls().last(), Some(&TransportCall::Release));
    }

    #[test]
    fn refused_close_releases_immediately() {
        let (mut session, fake) = session();
        session.connect(endpoint());
        session.handle_event(event(&session, TransportEventKind::Connected));
        fake.refuse_requests(true);

        session.disconnect();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn transport_error_is_terminal() {
        let (mut session, _fake) = session();
        session.connect(endpoint());
        session.handle_event(event(&session, TransportEventKind::Connected));
        session.handle_event(event(
            &session,
            TransportEventKind::Error("connection reset".to_string()),
        ));
        assert_eq!(session.state(), SessionState::Errored);

        session.handle_event(event(&session, TransportEventKind::Connected));
        assert_eq!(session.state(), SessionState::Errored);
    }

    #[test]
    fn error_while_disconnecting_counts_as_closed() {
        let (mut session, _fake) = session();
        session.connect(endpoint());
        session.disconnect();
        session.handle_event(event(
            &session,
            TransportEventKind::Error("connection refused".to_string()),
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn new_connect_starts_fresh_session_and_ignores_stale_events() {
        let (mut session, _fake) = session();
        session.connect(endpoint());
        let first = session.session_id();
        session.handle_event(event(
            &session,
            TransportEventKind::Error("refused".to_string()),
        ));

        session.connect(endpoint());
        assert_eq!(session.session_id(), first + 1);
        assert_eq!(session.state(), SessionState::Connecting);

        session.handle_event(TransportEvent::new(first, TransportEventKind::Connected));
        assert_eq!(session.state(), SessionState::Connecting);

        session.handle_event(event(&session, TransportEventKind::Connected));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn connect_while_active_is_ignored() {
        let (mut session, fake) = session();
        session.connect(endpoint());
        session.connect(endpoint());
        assert_eq!(session.session_id(), 1);
        let opens = fake
            .calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::Open { .. }))
            .count();
        assert_eq!(opens, 1);
    }

    #[test]
    fn messages_reach_observers_in_registration_order() {
        let (mut session, _fake) = session();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let sink = order.clone();
            session.on_message(move |msg| sink.lock().unwrap().push((tag, msg.content().to_string())));
        }

        session.connect(endpoint());
        session.handle_event(event(
            &session,
            TransportEventKind::Message(MQTTMessage::from_topic(TELEMETRY_TOPIC, "5")),
        ));
        assert!(order.lock().unwrap().is_empty());

        session.handle_event(event(&session, TransportEventKind::Connected));
        session.handle_event(event(
            &session,
            TransportEventKind::Message(MQTTMessage::from_topic(TELEMETRY_TOPIC, "7")),
        ));
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                ("first", "7".to_string()),
                ("second", "7".to_string()),
                ("third", "7".to_string())
            ]
        );
    }

    #[test]
    fn drop_releases_transport() {
        let (mut session, fake) = session();
        session.connect(endpoint());
        drop(session);
        assert_eq!(fake.calls().last(), Some(&TransportCall::Release));
    }
}
