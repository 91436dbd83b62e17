use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use luxos_client::{MinerClient, Plan, SolarFollower, SolarPlanner};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::settings::FollowSettings;

/// Reads the available power each tick and adjusts the miner until Ctrl-C.
pub async fn run(
    client: Arc<MinerClient>,
    settings: &FollowSettings,
    watts_file: PathBuf,
    interval: Duration,
) -> Result<()> {
    let planner = SolarPlanner::default().with_sleep_below(settings.sleep_below_watts);
    let mut follower = SolarFollower::new(client, planner).with_wake_settle(settings.wake_settle());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        watts_file = %watts_file.display(),
        interval_secs = interval.as_secs(),
        "following solar power"
    );
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("stopping solar follower");
                return Ok(());
            }
        }

        // A missing or unreadable reading skips the tick; the miner keeps its state.
        let watts = match read_watts(&watts_file).await {
            Ok(watts) => watts,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "skipping tick");
                continue;
            }
        };
        match follower.step(watts).await {
            Ok(Plan::Hold) => {}
            Ok(plan) => info!(watts, plan = ?plan, "solar adjustment applied"),
            Err(err) => warn!(watts, error = %err, "solar adjustment failed"),
        }
    }
}

pub async fn read_watts(path: &Path) -> Result<f64> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let watts: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid power reading {:?} in {}", raw.trim(), path.display()))?;
    Ok(watts)
}
