use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use super::{Channel, ChannelKind, Request, TransportError};

/// Frame terminator the firmware appends to every response.
const FRAME_TERMINATOR: u8 = 0;
const READ_CHUNK: usize = 4096;
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// The cgminer-compatible API on port 4028: one connection per command, the
/// request written as a bare JSON frame, the response read until a null byte
/// or until the peer closes.
#[derive(Debug, Clone)]
pub struct SocketChannel {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SocketChannel {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    async fn exchange(&self, frame: &[u8]) -> Result<String, TransportError> {
        let addrs = self.resolve().await?;
        let mut stream = TcpStream::connect(addrs.as_slice())
            .await
            .map_err(|err| self.connect_error(err))?;

        stream.write_all(frame).await?;
        stream.flush().await?;

        let mut response = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            if let Some(end) = chunk[..read].iter().position(|byte| *byte == FRAME_TERMINATOR) {
                response.extend_from_slice(&chunk[..end]);
                break;
            }
            response.extend_from_slice(&chunk[..read]);
            if response.len() > MAX_RESPONSE_BYTES {
                return Err(TransportError::Malformed(format!(
                    "response exceeds {MAX_RESPONSE_BYTES} bytes without a terminator"
                )));
            }
        }

        if response.iter().all(u8::is_ascii_whitespace) {
            return Err(TransportError::Empty);
        }
        String::from_utf8(response)
            .map_err(|err| TransportError::Malformed(format!("response is not utf-8: {err}")))
    }

    async fn resolve(&self) -> Result<Vec<SocketAddr>, TransportError> {
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|err| TransportError::Dns {
                host: self.host.clone(),
                reason: err.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Dns {
                host: self.host.clone(),
                reason: "no addresses returned".into(),
            });
        }
        Ok(addrs)
    }

    fn connect_error(&self, err: io::Error) -> TransportError {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => {
                TransportError::Refused(format!("{}:{}", self.host, self.port))
            }
            io::ErrorKind::TimedOut => TransportError::Timeout(self.timeout),
            _ => TransportError::Connect(format!("{}:{}: {err}", self.host, self.port)),
        }
    }
}

#[async_trait]
impl Channel for SocketChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Socket
    }

    async fn send(&self, request: &Request) -> Result<String, TransportError> {
        let frame = request.to_frame()?;
        debug!(
            target: "luxos::transport",
            channel = "socket",
            host = %self.host,
            port = self.port,
            command = %request.command,
            "sending frame"
        );
        timeout(self.timeout, self.exchange(&frame))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }
}
