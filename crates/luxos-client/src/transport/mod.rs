//! Wire channels. Each call opens a fresh connection (or request), sends one
//! command and returns the raw response text.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub mod http;
pub mod socket;

pub use http::HttpChannel;
pub use socket::SocketChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Null-terminated JSON frames on the cgminer API port.
    Socket,
    /// JSON body POSTed to the firmware's HTTP control endpoint.
    Http,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Socket => "socket",
            ChannelKind::Http => "http",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not resolve {host}: {reason}")]
    Dns { host: String, reason: String },
    #[error("connection refused by {0}")]
    Refused(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("device closed the connection without a response")]
    Empty,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("http error: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single command as it goes on the wire. The parameter is opaque: comma-joined
/// positional fields assembled by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    pub command: String,
    pub parameter: String,
}

impl Request {
    pub fn new(command: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            parameter: parameter.into(),
        }
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self)
            .map_err(|err| TransportError::Malformed(format!("encode request: {err}")))
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Sends one request and returns the response body as text.
    async fn send(&self, request: &Request) -> Result<String, TransportError>;

    /// Releases pooled resources. Must be safe to call repeatedly.
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_carries_command_and_parameter() {
        let frame = Request::new("curtail", "TOK1,sleep").to_frame().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["command"], "curtail");
        assert_eq!(value["parameter"], "TOK1,sleep");
    }
}
