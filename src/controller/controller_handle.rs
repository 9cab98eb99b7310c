//! Controller Handle - the operator-facing API of the controller engine
//!
//! The handle is cheap to clone and is the only way the UI reaches the session. It
//! submits requests and reads the two watched values; it never touches session state
//! directly.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::{ControlRequest, ControllerEngine};
use crate::mqtt::config::{Endpoint, MqttConfig};
use crate::mqtt::transport::{RumqttTransport, Transport, TransportEvent};
use crate::mqtt::{CommandIntent, Rejected, Sent, SessionState, TopicRouter};

const REQUEST_CAPACITY: usize = 32;

/// Everything the controller needs to run a session.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub endpoint: Endpoint,
    pub mqtt: MqttConfig,
    /// Open a session as soon as the engine starts
    pub auto_connect: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Controller engine is not running")]
    EngineStopped,

    #[error("Controller request queue is full")]
    QueueFull,
}

impl<T> From<mpsc::error::TrySendError<T>> for ControllerError {
    fn from(e: mpsc::error::TrySendError<T>) -> Self {
        match e {
            mpsc::error::TrySendError::Full(_) => ControllerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ControllerError::EngineStopped,
        }
    }
}

pub type CommandReply = oneshot::Receiver<Result<Sent, Rejected>>;

#[derive(Clone, Debug)]
pub struct ControllerHandle {
    requests: mpsc::Sender<ControlRequest>,
    session_state: watch::Receiver<SessionState>,
    telemetry: watch::Receiver<i64>,
    shutdown: CancellationToken,
}

impl ControllerHandle {
    /// Spawns the engine on the current runtime with the rumqttc transport.
    pub fn spawn(settings: ControllerSettings) -> (Self, JoinHandle<()>) {
        let mqtt = settings.mqtt.clone();
        Self::spawn_with_transport(settings, move |events| {
            Box::new(RumqttTransport::new(mqtt, events))
        })
    }

    /// Spawns the engine with a transport built from the event sender it must report to.
    pub fn spawn_with_transport<F>(settings: ControllerSettings, make_transport: F) -> (Self, JoinHandle<()>)
    where
        F: FnOnce(mpsc::Sender<TransportEvent>) -> Box<dyn Transport>,
    {
        info!(
            "Initializing controller for {} (auto connect: {})",
            settings.endpoint, settings.auto_connect
        );

        let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(settings.mqtt.channel_capacity.max(1));
        let router = TopicRouter::new(settings.mqtt.alert_polarity);

        let engine = ControllerEngine::create(
            request_rx,
            event_rx,
            make_transport(event_tx),
            router,
            settings.endpoint,
        )
        .configure();

        let session_state = engine.subscribe_state();
        let telemetry = engine.subscribe_telemetry();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let auto_connect = settings.auto_connect;
        let task = tokio::spawn(async move {
            let active = engine.activate(auto_connect);
            let stopped = active.run_until_shutdown(token).await.shutdown().await;
            debug!("Engine finished in session state {}", stopped.session_state());
        });

        let handle = Self {
            requests: request_tx,
            session_state,
            telemetry,
            shutdown,
        };
        (handle, task)
    }

    pub async fn connect(&self) -> Result<(), ControllerError> {
        self.send(ControlRequest::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        self.send(ControlRequest::Disconnect).await
    }

    /// Dispatches a command and waits for the engine's verdict.
    pub async fn command(&self, intent: CommandIntent) -> Result<Sent, Rejected> {
        let (reply, result) = oneshot::channel();
        if self
            .send(ControlRequest::Command { intent, reply })
            .await
            .is_err()
        {
            warn!("Command {} rejected: controller stopped", intent);
            return Err(Rejected::NotConnected);
        }
        result.await.unwrap_or_else(|_| {
            error!("Controller dropped command {} without answering", intent);
            Err(Rejected::NotConnected)
        })
    }

    /// Non-blocking variants for the UI thread.
    pub fn try_connect(&self) -> Result<(), ControllerError> {
        Ok(self.requests.try_send(ControlRequest::Connect)?)
    }

    pub fn try_disconnect(&self) -> Result<(), ControllerError> {
        Ok(self.requests.try_send(ControlRequest::Disconnect)?)
    }

    pub fn try_command(&self, intent: CommandIntent) -> Result<CommandReply, ControllerError> {
        let (reply, result) = oneshot::channel();
        self.requests
            .try_send(ControlRequest::Command { intent, reply })?;
        Ok(result)
    }

    pub fn session_state(&self) -> SessionState {
        *self.session_state.borrow()
    }

    pub fn telemetry(&self) -> i64 {
        *self.telemetry.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.session_state.clone()
    }

    pub fn subscribe_telemetry(&self) -> watch::Receiver<i64> {
        self.telemetry.clone()
    }

    /// Asks the engine to disconnect and stop. Await the task handle to wait for it.
    pub fn shutdown(&self) {
        debug!("Shutdown signal sent to controller engine");
        self.shutdown.cancel();
    }

    async fn send(&self, request: ControlRequest) -> Result<(), ControllerError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ControllerError::EngineStopped)
    }
}
