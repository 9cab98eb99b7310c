//! Controller engine with statum state machine
//!
//! Owns the session, the dispatcher and the telemetry projector, and is the only place
//! they are mutated. Operator requests and transport events are both applied from one
//! `select!` loop, in the order they arrive.
//!
//! # State Machine
//!
//! ```text
//! Initializing ──► Configured ──► Active ──► Deactivating ──► Deactivated
//! ```
//!
//! # Architecture
//!
//! ```text
//! ControlRequest ──┐
//!                  ├──► [Session] ──► watch<SessionState>
//! TransportEvent ──┘        │
//!                      [TopicRouter] ──► [TelemetryProjector] ──► watch<i64>
//! ```

use std::sync::Arc;
use std::time::Duration;

use statum::{machine, state};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mqtt::config::Endpoint;
use crate::mqtt::topics::Decoded;
use crate::mqtt::transport::{Transport, TransportEvent};
use crate::mqtt::{
    CommandDispatcher, CommandIntent, Rejected, Sent, Session, SessionState, TelemetryProjector,
    TopicRouter,
};

/// How long shutdown waits for the broker to acknowledge the disconnect.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum ControlRequest {
    Connect,
    Disconnect,
    Command {
        intent: CommandIntent,
        reply: oneshot::Sender<Result<Sent, Rejected>>,
    },
}

#[state]
#[derive(Debug, Clone)]
pub enum ControllerEngineState {
    Initializing,
    Configured,
    Active,
    Deactivating,
    Deactivated,
}

#[machine]
pub struct ControllerEngine<S: ControllerEngineState> {
    requests: mpsc::Receiver<ControlRequest>,
    transport_events: mpsc::Receiver<TransportEvent>,
    session: Session,
    router: TopicRouter,
    dispatcher: CommandDispatcher,
    projector: TelemetryProjector,
    state_sender: Arc<watch::Sender<SessionState>>,
    endpoint: Endpoint,
}

impl<S: ControllerEngineState> ControllerEngine<S> {
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_sender.subscribe()
    }

    pub fn subscribe_telemetry(&self) -> watch::Receiver<i64> {
        self.projector.subscribe()
    }
}

impl ControllerEngine<Initializing> {
    pub fn create(
        requests: mpsc::Receiver<ControlRequest>,
        transport_events: mpsc::Receiver<TransportEvent>,
        transport: Box<dyn Transport>,
        router: TopicRouter,
        endpoint: Endpoint,
    ) -> Self {
        info!("Initializing controller engine for {}", endpoint);
        let (state_sender, _) = watch::channel(SessionState::Idle);

        Self::new(
            requests,
            transport_events,
            Session::new(transport, &router),
            router,
            CommandDispatcher::new(router),
            TelemetryProjector::new(),
            Arc::new(state_sender),
            endpoint,
        )
    }

    /// Wires the session observers and transitions to Configured.
    pub fn configure(mut self) -> ControllerEngine<Configured> {
        let state_sender = self.state_sender.clone();
        let projector = self.projector.clone();
        self.session.on_state_change(move |state| {
            if state == SessionState::Connecting {
                projector.reset();
            }
            state_sender.send_replace(state);
        });

        let router = self.router;
        let projector = self.projector.clone();
        self.session.on_message(move |message| {
            if let Decoded::Message(typed) = router.decode(message.topic(), message.content()) {
                projector.on_typed_message(&typed);
            }
        });

        debug!("Session observers registered");
        self.transition()
    }
}

impl ControllerEngine<Configured> {
    pub fn activate(mut self, auto_connect: bool) -> ControllerEngine<Active> {
        info!("Activating controller engine");
        if auto_connect {
            self.session.connect(self.endpoint.clone());
        }
        self.transition()
    }
}

impl ControllerEngine<Active> {
    pub fn handle_request(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Connect => self.session.connect(self.endpoint.clone()),
            ControlRequest::Disconnect => self.session.disconnect(),
            ControlRequest::Command { intent, reply } => {
                let result = self.dispatcher.dispatch(&mut self.session, intent);
                if reply.send(result).is_err() {
                    debug!("Requester of {} went away before the result", intent);
                }
            }
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        self.session.handle_event(event);
    }

    /// Main loop. Ends on cancellation or once every handle is gone.
    pub async fn run_until_shutdown(
        mut self,
        shutdown: CancellationToken,
    ) -> ControllerEngine<Deactivating> {
        info!("Controller engine running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                Some(event) = self.transport_events.recv() => {
                    self.handle_transport_event(event);
                }

                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        info!("All controller handles dropped");
                        break;
                    }
                }
            }
        }

        self.transition()
    }
}

impl ControllerEngine<Deactivating> {
    /// Disconnects and waits briefly for the session to end; the transport is released
    /// with the session either way.
    pub async fn shutdown(mut self) -> ControllerEngine<Deactivated> {
        self.session.disconnect();

        let grace = tokio::time::sleep(SHUTDOWN_GRACE);
        tokio::pin!(grace);

        while self.session.state().is_active() {
            tokio::select! {
                _ = &mut grace => {
                    warn!("Session did not close within {:?}", SHUTDOWN_GRACE);
                    break;
                }
                event = self.transport_events.recv() => match event {
                    Some(event) => self.session.handle_event(event),
                    None => break,
                }
            }
        }

        info!("Controller engine stopped ({})", self.session.state());
        self.transition()
    }
}

impl ControllerEngine<Deactivated> {}
