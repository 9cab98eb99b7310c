use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use super::topics::AlertPolarity;

pub const DEFAULT_ENDPOINT: &str = "ws://test.mosquitto.org:8080/mqtt";
pub const DEFAULT_CLIENT_ID: &str = "mqtt-car-controller";

/// Broker connection settings as stored in the `[mqtt]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker address, `ws://`, `wss://`, `mqtt://` or `tcp://`
    pub endpoint: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Capacity of the rumqttc request queue and of the transport event channel
    pub channel_capacity: usize,
    pub alert_polarity: AlertPolarity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            keep_alive_secs: 5,
            channel_capacity: 100,
            alert_polarity: AlertPolarity::default(),
            username: None,
            password: None,
        }
    }
}

impl MqttConfig {
    pub fn endpoint(&self) -> Result<Endpoint, EndpointError> {
        self.endpoint.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointScheme {
    Tcp,
    Ws,
    Wss,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Invalid broker address '{0}': {1}")]
    Malformed(String, String),

    #[error("Unsupported scheme '{0}', expected ws, wss, mqtt or tcp")]
    UnsupportedScheme(String),

    #[error("Broker address '{0}' has no host")]
    MissingHost(String),
}

/// A validated broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    scheme: EndpointScheme,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn scheme(&self) -> EndpointScheme {
        self.scheme
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.scheme, EndpointScheme::Ws | EndpointScheme::Wss)
    }

    /// Address handed to rumqttc: the full URL for websockets, the bare host otherwise.
    pub fn broker_addr(&self) -> String {
        if self.is_websocket() {
            self.url.to_string()
        } else {
            self.host.clone()
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(raw.trim())
            .map_err(|e| EndpointError::Malformed(raw.to_string(), e.to_string()))?;

        let scheme = match url.scheme() {
            "ws" => EndpointScheme::Ws,
            "wss" => EndpointScheme::Wss,
            "mqtt" | "tcp" => EndpointScheme::Tcp,
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(EndpointError::MissingHost(raw.to_string())),
        };

        let port = url.port_or_known_default().unwrap_or(1883);

        Ok(Self {
            url,
            scheme,
            host,
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_websocket_endpoint() {
        let endpoint: Endpoint = DEFAULT_ENDPOINT.parse().unwrap();
        assert_eq!(endpoint.scheme(), EndpointScheme::Ws);
        assert_eq!(endpoint.port(), 8080);
        assert_eq!(endpoint.broker_addr(), DEFAULT_ENDPOINT);
    }

    #[test]
    fn tcp_endpoint_defaults_to_1883() {
        let endpoint: Endpoint = "mqtt://broker.local".parse().unwrap();
        assert_eq!(endpoint.scheme(), EndpointScheme::Tcp);
        assert_eq!(endpoint.port(), 1883);
        assert_eq!(endpoint.broker_addr(), "broker.local");
    }

    #[test]
    fn wss_endpoint_uses_known_port() {
        let endpoint: Endpoint = "wss://broker.example.com/mqtt".parse().unwrap();
        assert_eq!(endpoint.port(), 443);
        assert!(endpoint.is_websocket());
    }

    #[test]
    fn rejects_unknown_scheme_and_garbage() {
        assert!(matches!(
            "http://broker.local".parse::<Endpoint>(),
            Err(EndpointError::UnsupportedScheme(s)) if s == "http"
        ));
        assert!(matches!(
            "not an address".parse::<Endpoint>(),
            Err(EndpointError::Malformed(..))
        ));
    }
}
