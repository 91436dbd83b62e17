use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use luxos_client::ClientConfig;
use serde::Deserialize;

use crate::cli::ConnectionArgs;

/// Values from the optional settings file and `PV_MINER__*` environment variables.
/// Command-line flags are applied on top in [`Settings::resolve`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub socket_port: Option<u16>,
    pub http_port: Option<u16>,
    pub timeout_ms: Option<u64>,
    pub autotuner_settle_ms: Option<u64>,
    pub verify_delay_ms: Option<u64>,
    pub follow: FollowSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FollowSettings {
    pub interval_secs: u64,
    pub sleep_below_watts: f64,
    pub wake_settle_secs: u64,
}

impl Default for FollowSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            sleep_below_watts: luxos_client::solar::SLEEP_BELOW_WATTS,
            wake_settle_secs: luxos_client::solar::WAKE_SETTLE.as_secs(),
        }
    }
}

impl FollowSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn wake_settle(&self) -> Duration {
        Duration::from_secs(self.wake_settle_secs)
    }
}

impl FileSettings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("PV_MINER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .context("failed to load settings")
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub client: ClientConfig,
    pub follow: FollowSettings,
}

impl Settings {
    pub fn resolve(file: FileSettings, args: &ConnectionArgs) -> Result<Self> {
        let host = normalize_opt(args.host.clone())
            .or_else(|| normalize_opt(file.host.clone()))
            .ok_or_else(|| anyhow!("miner host is required (--host, PV_MINER_HOST or settings file)"))?;
        let username = args
            .username
            .clone()
            .or(file.username)
            .unwrap_or_else(|| luxos_client::config::DEFAULT_USERNAME.to_string());
        let password = args
            .password
            .clone()
            .or(file.password)
            .unwrap_or_else(|| luxos_client::config::DEFAULT_PASSWORD.to_string());

        let mut client = ClientConfig::new(host, username, password);
        if let Some(port) = file.socket_port {
            client.socket_port = port;
        }
        if let Some(port) = file.http_port {
            client.http_port = port;
        }
        if let Some(ms) = file.autotuner_settle_ms {
            client.autotuner_settle_ms = ms;
        }
        if let Some(ms) = file.verify_delay_ms {
            client.verify_delay_ms = ms;
        }
        if let Some(secs) = args.timeout_secs {
            client = client.with_timeout(Duration::from_secs(secs));
        } else if let Some(ms) = file.timeout_ms {
            client.timeout_ms = ms;
        }

        Ok(Self {
            client,
            follow: file.follow,
        })
    }
}

fn normalize_opt(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
