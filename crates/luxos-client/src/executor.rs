use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::envelope::Envelope;
use crate::error::{ChannelFailure, ProtocolError};
use crate::transport::{Channel, HttpChannel, Request, SocketChannel};

/// Sends commands over an ordered list of channels, falling through to the next
/// channel on any transport failure.
pub struct CommandExecutor {
    channels: Vec<Arc<dyn Channel>>,
}

impl CommandExecutor {
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Self {
        Self { channels }
    }

    /// Framed socket first, HTTP second.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ProtocolError> {
        let endpoint = config.http_endpoint()?;
        let socket = SocketChannel::new(config.normalized_host(), config.socket_port, config.timeout());
        let http = HttpChannel::new(endpoint, config.timeout());
        let channels: Vec<Arc<dyn Channel>> = vec![Arc::new(socket), Arc::new(http)];
        Ok(Self::new(channels))
    }

    /// Delivers `command` and parses whatever came back, without judging its status.
    /// Fails only when every channel failed.
    pub async fn send(&self, command: &str, parameter: &str) -> Result<Envelope, ProtocolError> {
        let request = Request::new(command, parameter);
        let mut failures = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            match channel.send(&request).await {
                Ok(body) => {
                    if !failures.is_empty() {
                        debug!(
                            target: "luxos::executor",
                            command,
                            channel = %channel.kind(),
                            "delivered after fallback"
                        );
                    }
                    trace!(target: "luxos::executor", command, bytes = body.len(), "response received");
                    return Ok(Envelope::parse(&body));
                }
                Err(error) => {
                    debug!(
                        target: "luxos::executor",
                        command,
                        channel = %channel.kind(),
                        error = %error,
                        "channel failed"
                    );
                    failures.push(ChannelFailure {
                        channel: channel.kind(),
                        error,
                    });
                }
            }
        }
        Err(ProtocolError::Unreachable {
            command: command.to_string(),
            failures,
        })
    }

    /// Like [`send`](Self::send), but a failure status becomes an error.
    pub async fn execute(&self, command: &str, parameter: &str) -> Result<Envelope, ProtocolError> {
        self.send(command, parameter).await?.into_result(command)
    }

    pub fn close(&self) {
        for channel in &self.channels {
            channel.close();
        }
    }
}
