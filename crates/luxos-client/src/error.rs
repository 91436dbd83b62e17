use std::fmt;

use thiserror::Error;

use crate::transport::{ChannelKind, TransportError};

/// One failed attempt on one channel, kept so the final error can name every layer that failed.
#[derive(Debug)]
pub struct ChannelFailure {
    pub channel: ChannelKind,
    pub error: TransportError,
}

impl fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.channel, self.error)
    }
}

/// The only error type surfaced by the client's public operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("`{command}` failed on every channel ({})", join_failures(.failures))]
    Unreachable {
        command: String,
        failures: Vec<ChannelFailure>,
    },
    #[error("`{command}` rejected by device: {message}")]
    Rejected { command: String, message: String },
    #[error("`{command}` rejected, session expired: {message}")]
    SessionExpired { command: String, message: String },
    #[error("no session available: login returned no session id")]
    NoSession,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProtocolError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ProtocolError::SessionExpired { .. })
    }

    /// The device's own status message, when the failure came from the device.
    pub fn device_message(&self) -> Option<&str> {
        match self {
            ProtocolError::Rejected { message, .. }
            | ProtocolError::SessionExpired { message, .. } => Some(message),
            _ => None,
        }
    }
}

fn join_failures(failures: &[ChannelFailure]) -> String {
    if failures.is_empty() {
        return "no channels configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
