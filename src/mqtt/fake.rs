use std::sync::{Arc, Mutex, MutexGuard};

use super::config::Endpoint;
use super::transport::{SessionId, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Open { endpoint: String, session_id: SessionId },
    Subscribe(String),
    Publish { topic: String, payload: String },
    Close,
    Release,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<TransportCall>,
    fail_open: bool,
    refuse_requests: bool,
}

/// In-memory transport that records every call; events are injected by the caller.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `open` fails as if the broker were unreachable.
    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Every subsequent subscribe/publish/close is refused as if the request queue were full.
    pub fn refuse_requests(&self, refuse: bool) {
        self.lock().refuse_requests = refuse;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish { topic, payload } => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request(&self, call: TransportCall) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.refuse_requests {
            return Err(TransportError::RequestRejected("fake queue full".to_string()));
        }
        state.calls.push(call);
        Ok(())
    }
}

impl Transport for FakeTransport {
    fn open(&mut self, endpoint: &Endpoint, session_id: SessionId) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(TransportError::Unavailable("fake broker unreachable".to_string()));
        }
        state.calls.push(TransportCall::Open {
            endpoint: endpoint.to_string(),
            session_id,
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.request(TransportCall::Subscribe(topic.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        self.request(TransportCall::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.request(TransportCall::Close)
    }

    fn release(&mut self) {
        self.lock().calls.push(TransportCall::Release);
    }
}
