use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ProtocolError;

pub const DEFAULT_USERNAME: &str = "root";
pub const DEFAULT_PASSWORD: &str = "root";
pub const DEFAULT_SOCKET_PORT: u16 = 4028;
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_HTTP_PATH: &str = "/api";

/// Connection and pacing settings for one miner.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_socket_port")]
    pub socket_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_http_path")]
    pub http_path: String,
    /// Deadline for each transport attempt (connect + send + receive).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause after suspending the autotuner before touching a board.
    #[serde(default = "default_autotuner_settle_ms")]
    pub autotuner_settle_ms: u64,
    /// Pause after a board change before reading the board list back.
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,
    /// Attempts for a privileged operation when the device expires the session.
    #[serde(default = "default_session_attempts")]
    pub session_attempts: usize,
}

impl ClientConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            socket_port: DEFAULT_SOCKET_PORT,
            http_port: DEFAULT_HTTP_PORT,
            http_path: default_http_path(),
            timeout_ms: default_timeout_ms(),
            autotuner_settle_ms: default_autotuner_settle_ms(),
            verify_delay_ms: default_verify_delay_ms(),
            session_attempts: default_session_attempts(),
        }
    }

    pub fn with_ports(mut self, socket_port: u16, http_port: u16) -> Self {
        self.socket_port = socket_port;
        self.http_port = http_port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_board_delays(mut self, settle: Duration, verify: Duration) -> Self {
        self.autotuner_settle_ms = settle.as_millis() as u64;
        self.verify_delay_ms = verify.as_millis() as u64;
        self
    }

    /// Hostname without scheme, path, or trailing slash, as operators tend to paste URLs.
    pub fn normalized_host(&self) -> String {
        let trimmed = self.host.trim();
        let without_scheme = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .unwrap_or(trimmed);
        without_scheme
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn autotuner_settle(&self) -> Duration {
        Duration::from_millis(self.autotuner_settle_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn session_attempts(&self) -> usize {
        self.session_attempts.max(1)
    }

    pub fn http_endpoint(&self) -> Result<Url, ProtocolError> {
        let host = self.normalized_host();
        if host.is_empty() {
            return Err(ProtocolError::InvalidRequest("miner host is empty".into()));
        }
        let path = if self.http_path.starts_with('/') {
            self.http_path.clone()
        } else {
            format!("/{}", self.http_path)
        };
        let raw = if host.contains(':') && !host.starts_with('[') {
            // Bare IPv6 literal.
            format!("http://[{host}]:{}{path}", self.http_port)
        } else {
            format!("http://{host}:{}{path}", self.http_port)
        };
        Url::parse(&raw)
            .map_err(|err| ProtocolError::InvalidRequest(format!("invalid endpoint '{raw}': {err}")))
    }
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}

fn default_socket_port() -> u16 {
    DEFAULT_SOCKET_PORT
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_http_path() -> String {
    DEFAULT_HTTP_PATH.to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_autotuner_settle_ms() -> u64 {
    500
}

fn default_verify_delay_ms() -> u64 {
    1_000
}

fn default_session_attempts() -> usize {
    2
}
