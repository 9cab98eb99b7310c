//! Broker transport: the capability set the session needs, and its rumqttc implementation.
//!
//! Every request is non-blocking. Outcomes come back as [`TransportEvent`]s on the
//! channel handed to the transport at construction, tagged with the id of the session
//! that opened the connection.
//!
//! ```text
//! Session ──open/subscribe/publish/close──► RumqttTransport ──► AsyncClient
//!                                                                  │
//! Session ◄──── TransportEvent (mpsc) ◄──── pump task ◄──── EventLoop::poll
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::config::{Endpoint, EndpointScheme, MqttConfig};
use super::message_manager::MQTTMessage;

pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Connected,
    Message(MQTTMessage),
    Closed,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub session_id: SessionId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(session_id: SessionId, kind: TransportEventKind) -> Self {
        Self { session_id, kind }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("No open connection")]
    NotOpen,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Request rejected by client queue: {0}")]
    RequestRejected(String),
}

/// Operations the session drives. Implementations must not block.
pub trait Transport: Send {
    /// Starts establishing a connection. Success only means the attempt is under way.
    fn open(&mut self, endpoint: &Endpoint, session_id: SessionId) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError>;

    /// Requests a graceful disconnect; completion is reported as a `Closed` event.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Drops the connection and everything attached to it immediately.
    fn release(&mut self);
}

pub struct RumqttTransport {
    settings: MqttConfig,
    events: mpsc::Sender<TransportEvent>,
    client: Option<AsyncClient>,
    pump: Option<JoinHandle<()>>,
}

impl RumqttTransport {
    pub fn new(settings: MqttConfig, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            settings,
            events,
            client: None,
            pump: None,
        }
    }

    fn options(&self, endpoint: &Endpoint) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            endpoint.broker_addr(),
            endpoint.port(),
        );
        options
            .set_keep_alive(Duration::from_secs(self.settings.keep_alive_secs))
            .set_clean_session(true);

        if let Some(user) = &self.settings.username {
            options.set_credentials(
                user.clone(),
                self.settings.password.clone().unwrap_or_default(),
            );
        }

        match endpoint.scheme() {
            EndpointScheme::Ws => {
                options.set_transport(rumqttc::Transport::Ws);
            }
            EndpointScheme::Wss => {
                options.set_transport(rumqttc::Transport::wss_with_default_config());
            }
            EndpointScheme::Tcp => {}
        }

        options
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotOpen)
    }
}

impl Transport for RumqttTransport {
    fn open(&mut self, endpoint: &Endpoint, session_id: SessionId) -> Result<(), TransportError> {
        self.release();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let (client, eventloop) =
            AsyncClient::new(self.options(endpoint), self.settings.channel_capacity.max(1));

        info!("Opening MQTT connection to {} (session {})", endpoint, session_id);
        self.pump = Some(runtime.spawn(pump_events(
            eventloop,
            session_id,
            self.events.clone(),
        )));
        self.client = Some(client);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client()?
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::RequestRejected(e.to_string()))?;
        debug!("Subscribe request queued for {}", topic);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        self.client()?
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| TransportError::RequestRejected(e.to_string()))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let result = self
            .client()?
            .try_disconnect()
            .map_err(|e| TransportError::RequestRejected(e.to_string()));

        if let Err(e) = &result {
            warn!("Graceful disconnect failed, dropping connection: {}", e);
            self.release();
        }
        result
    }

    fn release(&mut self) {
        if let Some(pump) = self.pump.take() {
            if !pump.is_finished() {
                debug!("Aborting MQTT event pump");
            }
            pump.abort();
        }
        self.client = None;
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        self.release();
    }
}

/// Polls the event loop until the connection ends. Stopping at the first error keeps
/// rumqttc from reconnecting by itself.
async fn pump_events(
    mut eventloop: EventLoop,
    session_id: SessionId,
    events: mpsc::Sender<TransportEvent>,
) {
    loop {
        let (kind, terminal) = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("ConnAck received: {:?}", ack.code);
                (TransportEventKind::Connected, false)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => (
                TransportEventKind::Message(MQTTMessage::from_bytes(
                    publish.topic.clone(),
                    &publish.payload,
                )),
                false,
            ),
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("Broker closed session {}", session_id);
                (TransportEventKind::Closed, true)
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Session {} disconnected", session_id);
                (TransportEventKind::Closed, true)
            }
            Ok(other) => {
                trace!("MQTT event: {:?}", other);
                continue;
            }
            Err(e) => {
                error!("MQTT connection error on session {}: {}", session_id, e);
                (TransportEventKind::Error(e.to_string()), true)
            }
        };

        if events
            .send(TransportEvent::new(session_id, kind))
            .await
            .is_err()
        {
            debug!("Transport event receiver dropped, stopping pump");
            break;
        }
        if terminal {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> (RumqttTransport, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (RumqttTransport::new(MqttConfig::default(), tx), rx)
    }

    #[test]
    fn requests_without_open_connection_fail() {
        let (mut transport, _rx) = transport();
        assert_eq!(transport.subscribe("home/speed"), Err(TransportError::NotOpen));
        assert_eq!(transport.publish("home/led", "on"), Err(TransportError::NotOpen));
        assert_eq!(transport.close(), Err(TransportError::NotOpen));
    }

    #[test]
    fn open_outside_runtime_is_unavailable() {
        let (mut transport, _rx) = transport();
        let endpoint: Endpoint = "mqtt://127.0.0.1:1".parse().unwrap();
        assert!(matches!(
            transport.open(&endpoint, 1),
            Err(TransportError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn refused_connection_reports_error_event() {
        let (mut transport, mut rx) = transport();
        // Port 1 on loopback refuses immediately.
        let endpoint: Endpoint = "mqtt://127.0.0.1:1".parse().unwrap();
        transport.open(&endpoint, 7).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id, 7);
        assert!(matches!(event.kind, TransportEventKind::Error(_)));
    }

    /// Accepts one client, answers its CONNECT and pushes a single QoS 0 speed reading.
    async fn one_shot_broker() -> (u16, JoinHandle<()>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _connect = stream.read(&mut buf).await.unwrap();

            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            let mut publish = vec![0x30, 0x10, 0x00, 0x0A];
            publish.extend_from_slice(b"home/speed");
            publish.extend_from_slice(b"1200");
            stream.write_all(&publish).await.unwrap();

            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });
        (port, broker)
    }

    async fn next_kind(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEventKind {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("pump alive");
        assert_eq!(event.session_id, 3);
        event.kind
    }

    #[tokio::test]
    async fn pump_maps_connack_publish_and_disconnect() {
        let (port, broker) = one_shot_broker().await;
        let (mut transport, mut rx) = transport();
        let endpoint: Endpoint = format!("mqtt://127.0.0.1:{}", port).parse().unwrap();
        transport.open(&endpoint, 3).unwrap();

        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Connected);
        match next_kind(&mut rx).await {
            TransportEventKind::Message(message) => {
                assert_eq!(message.topic(), "home/speed");
                assert_eq!(message.content(), "1200");
            }
            other => panic!("expected a message, got {:?}", other),
        }

        transport.close().unwrap();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Closed);

        // The pump stops after the first terminal event.
        let after = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(!matches!(after, Ok(Some(_))));

        transport.release();
        broker.abort();
    }
}
