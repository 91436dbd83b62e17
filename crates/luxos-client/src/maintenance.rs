use std::sync::Arc;

use tracing::info;

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::executor::CommandExecutor;
use crate::session::SessionManager;

const RESTART_COMMAND: &str = "restart";
const ADD_POOL_COMMAND: &str = "addpool";
const SWITCH_POOL_COMMAND: &str = "switchpool";
const FREQUENCY_COMMAND: &str = "frequencyset";

/// A pool to register with the miner. `password` defaults to `x`, the value most
/// pools ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub url: String,
    pub user: String,
    pub password: String,
}

impl PoolSpec {
    pub fn new(url: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: "x".to_string(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    fn parameter(&self) -> Result<String, ProtocolError> {
        for (label, value) in [("url", &self.url), ("user", &self.user)] {
            if value.trim().is_empty() {
                return Err(ProtocolError::InvalidRequest(format!("pool {label} is empty")));
            }
        }
        for (label, value) in [("url", &self.url), ("user", &self.user), ("password", &self.password)] {
            if value.contains(',') {
                return Err(ProtocolError::InvalidRequest(format!(
                    "pool {label} contains the field separator ','"
                )));
            }
        }
        Ok(format!("{},{},{}", self.url.trim(), self.user.trim(), self.password))
    }
}

/// Privileged device-wide operations outside curtailment, profiles and boards.
pub struct MaintenanceController {
    executor: Arc<CommandExecutor>,
    session: Arc<SessionManager>,
}

impl MaintenanceController {
    pub fn new(executor: Arc<CommandExecutor>, session: Arc<SessionManager>) -> Self {
        Self { executor, session }
    }

    /// Restarts the mining process. The device drops its sessions on restart, so the
    /// cached token is discarded once the command is accepted.
    pub async fn restart_miner(&self) -> Result<Envelope, ProtocolError> {
        let response = self.privileged(RESTART_COMMAND, None).await?;
        self.session.invalidate().await;
        info!(target: "luxos::maintenance", "miner restart requested");
        Ok(response)
    }

    pub async fn add_pool(&self, pool: &PoolSpec) -> Result<Envelope, ProtocolError> {
        let payload = pool.parameter()?;
        let response = self.privileged(ADD_POOL_COMMAND, Some(&payload)).await?;
        info!(target: "luxos::maintenance", url = %pool.url, user = %pool.user, "pool added");
        Ok(response)
    }

    /// Makes the pool with device id `pool_id` the active one.
    pub async fn switch_pool(&self, pool_id: u32) -> Result<Envelope, ProtocolError> {
        let response = self
            .privileged(SWITCH_POOL_COMMAND, Some(&pool_id.to_string()))
            .await?;
        info!(target: "luxos::maintenance", pool = pool_id, "pool switched");
        Ok(response)
    }

    /// Sets the chip frequency in MHz for every board.
    pub async fn set_frequency(&self, mhz: u32) -> Result<Envelope, ProtocolError> {
        if mhz == 0 {
            return Err(ProtocolError::InvalidRequest("frequency must be above 0 MHz".into()));
        }
        let response = self
            .privileged(FREQUENCY_COMMAND, Some(&mhz.to_string()))
            .await?;
        info!(target: "luxos::maintenance", mhz, "frequency set");
        Ok(response)
    }

    async fn privileged(&self, command: &str, payload: Option<&str>) -> Result<Envelope, ProtocolError> {
        let executor = &self.executor;
        self.session
            .run_privileged(command, |token| async move {
                let parameter = match payload {
                    Some(payload) => format!("{token},{payload}"),
                    None => token.to_string(),
                };
                executor.execute(command, &parameter).await
            })
            .await
    }
}
