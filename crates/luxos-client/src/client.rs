use std::sync::Arc;

use tracing::{debug, info};

use crate::board::{BoardChange, BoardController};
use crate::config::ClientConfig;
use crate::curtail::{CurtailOutcome, CurtailState, CurtailmentController};
use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::executor::CommandExecutor;
use crate::maintenance::{MaintenanceController, PoolSpec};
use crate::profile::{ProfileController, ProfileInfo};
use crate::session::{Credentials, SessionManager};
use crate::telemetry::{parse_boards, BoardStatus, Snapshot};
use crate::transport::Channel;

/// Entry point for one miner: telemetry reads plus the privileged controls, all
/// sharing one executor and one session.
pub struct MinerClient {
    config: ClientConfig,
    executor: Arc<CommandExecutor>,
    session: Arc<SessionManager>,
    curtail: CurtailmentController,
    profiles: ProfileController,
    boards: BoardController,
    maintenance: MaintenanceController,
}

impl MinerClient {
    /// Connects over the framed socket with HTTP as fallback. Nothing is sent until
    /// the first call.
    pub fn new(config: ClientConfig) -> Result<Self, ProtocolError> {
        let executor = CommandExecutor::from_config(&config)?;
        Ok(Self::with_executor(config, executor))
    }

    /// Uses caller-supplied channels in the given order instead of the defaults.
    pub fn with_channels(config: ClientConfig, channels: Vec<Arc<dyn Channel>>) -> Self {
        Self::with_executor(config, CommandExecutor::new(channels))
    }

    fn with_executor(config: ClientConfig, executor: CommandExecutor) -> Self {
        let executor = Arc::new(executor);
        let session = Arc::new(SessionManager::new(
            executor.clone(),
            Credentials::new(config.username.clone(), config.password.clone()),
            config.session_attempts(),
        ));
        Self {
            curtail: CurtailmentController::new(executor.clone(), session.clone()),
            profiles: ProfileController::new(executor.clone(), session.clone()),
            boards: BoardController::new(
                executor.clone(),
                session.clone(),
                config.autotuner_settle(),
                config.verify_delay(),
            ),
            maintenance: MaintenanceController::new(executor.clone(), session.clone()),
            config,
            executor,
            session,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Cheap reachability probe. A device that answers `version` is reachable;
    /// otherwise a successful login is taken as a second opinion. Never fails.
    pub async fn test_connection(&self) -> bool {
        match self.executor.send("version", "").await {
            Ok(response) if response.has_section("STATUS") || response.has_section("VERSION") => {
                return true;
            }
            Ok(_) => debug!(target: "luxos::executor", "version response had no status"),
            Err(err) => debug!(target: "luxos::executor", error = %err, "version probe failed"),
        }
        matches!(self.session.ensure_session().await, Ok(Some(_)))
    }

    pub async fn get_stats(&self) -> Result<Envelope, ProtocolError> {
        self.read("stats").await
    }

    pub async fn get_devs(&self) -> Result<Envelope, ProtocolError> {
        self.read("devs").await
    }

    pub async fn get_pools(&self) -> Result<Envelope, ProtocolError> {
        self.read("pools").await
    }

    pub async fn get_summary(&self) -> Result<Envelope, ProtocolError> {
        self.read("summary").await
    }

    pub async fn get_version(&self) -> Result<Envelope, ProtocolError> {
        self.read("version").await
    }

    pub async fn get_temps(&self) -> Result<Envelope, ProtocolError> {
        self.read("temps").await
    }

    pub async fn get_fans(&self) -> Result<Envelope, ProtocolError> {
        self.read("fans").await
    }

    pub async fn get_power(&self) -> Result<Envelope, ProtocolError> {
        self.read("power").await
    }

    pub async fn get_config(&self) -> Result<Envelope, ProtocolError> {
        self.read("config").await
    }

    /// One poll's worth of telemetry. `stats` must succeed; the other sections are
    /// left empty when their reads fail.
    pub async fn snapshot(&self) -> Result<Snapshot, ProtocolError> {
        let stats = self.get_stats().await?;
        Ok(Snapshot {
            stats,
            devs: self.optional("devs").await,
            pools: self.optional("pools").await,
            power: self.optional("power").await,
            temps: self.optional("temps").await,
            fans: self.optional("fans").await,
        })
    }

    pub async fn boards(&self) -> Result<Vec<BoardStatus>, ProtocolError> {
        Ok(parse_boards(&self.get_devs().await?))
    }

    pub async fn pause_mining(&self) -> Result<CurtailOutcome, ProtocolError> {
        self.curtail.pause().await
    }

    pub async fn resume_mining(&self) -> Result<CurtailOutcome, ProtocolError> {
        self.curtail.resume().await
    }

    pub fn curtail_state(&self) -> CurtailState {
        self.curtail.state()
    }

    pub async fn list_profiles(&self) -> Vec<String> {
        self.profiles.list_profiles().await
    }

    pub async fn profile_catalog(&self) -> Result<Vec<ProfileInfo>, ProtocolError> {
        self.profiles.catalog().await
    }

    pub async fn profile_details(&self, name: &str) -> Result<ProfileInfo, ProtocolError> {
        self.profiles.profile_details(name).await
    }

    pub async fn apply_profile(&self, name: &str) -> Result<Envelope, ProtocolError> {
        self.profiles.apply_profile(name).await
    }

    pub async fn enable_board(&self, index: u32) -> Result<BoardChange, ProtocolError> {
        self.boards.enable_board(index).await
    }

    pub async fn disable_board(&self, index: u32) -> Result<BoardChange, ProtocolError> {
        self.boards.disable_board(index).await
    }

    pub async fn restart_miner(&self) -> Result<Envelope, ProtocolError> {
        self.maintenance.restart_miner().await
    }

    pub async fn add_pool(&self, pool: &PoolSpec) -> Result<Envelope, ProtocolError> {
        self.maintenance.add_pool(pool).await
    }

    pub async fn switch_pool(&self, pool_id: u32) -> Result<Envelope, ProtocolError> {
        self.maintenance.switch_pool(pool_id).await
    }

    pub async fn set_frequency(&self, mhz: u32) -> Result<Envelope, ProtocolError> {
        self.maintenance.set_frequency(mhz).await
    }

    /// Drops pooled connections and the cached session. Safe to call repeatedly;
    /// the client stays usable and reconnects on the next call.
    pub async fn close(&self) {
        self.executor.close();
        self.session.invalidate().await;
        info!(target: "luxos::session", host = %self.config.normalized_host(), "client closed");
    }

    async fn read(&self, command: &str) -> Result<Envelope, ProtocolError> {
        self.executor.execute(command, "").await
    }

    async fn optional(&self, command: &str) -> Option<Envelope> {
        match self.read(command).await {
            Ok(response) => Some(response),
            Err(err) => {
                debug!(target: "luxos::executor", command, error = %err, "optional read failed");
                None
            }
        }
    }
}
