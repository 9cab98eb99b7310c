use tracing::{info, warn};

use super::session::{Session, SessionState};
use super::topics::{Command, CommandIntent, TopicRouter};
use super::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sent {
    pub intent: CommandIntent,
    pub command: Command,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Rejected {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Transport refused the command: {0}")]
    TransportRefused(String),
}

/// The one gate commands pass through. Nothing is queued or retried: a rejected command
/// is gone and has to be issued again after reconnecting.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDispatcher {
    router: TopicRouter,
}

impl CommandDispatcher {
    pub fn new(router: TopicRouter) -> Self {
        Self { router }
    }

    pub fn dispatch(
        &self,
        session: &mut Session,
        intent: CommandIntent,
    ) -> Result<Sent, Rejected> {
        let state = session.state();
        if state != SessionState::Connected {
            warn!("Command {} rejected: session is {}", intent, state);
            return Err(Rejected::NotConnected);
        }

        let command = self.router.encode(intent);
        match session.send(command.topic, command.payload) {
            Ok(()) => {
                info!("Command {} sent", intent);
                Ok(Sent { intent, command })
            }
            Err(TransportError::NotConnected) => Err(Rejected::NotConnected),
            Err(e) => {
                warn!("Command {} rejected: {}", intent, e);
                Err(Rejected::TransportRefused(e.to_string()))
            }
        }
    }
}
