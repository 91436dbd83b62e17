//! Follows available solar power by curtailing the miner or stepping its profile.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::client::MinerClient;
use crate::error::ProtocolError;

/// Below this much available power the miner is put to sleep.
pub const SLEEP_BELOW_WATTS: f64 = 500.0;

/// Time the miner gets to come out of sleep before a profile is applied.
pub const WAKE_SETTLE: Duration = Duration::from_secs(5);

/// Lower bound of available watts for each profile, ascending.
const POWER_TABLE: &[(f64, &str)] = &[
    (0.0, "260MHz"),
    (2300.0, "285MHz"),
    (2400.0, "310MHz"),
    (2500.0, "335MHz"),
    (2600.0, "360MHz"),
    (2700.0, "385MHz"),
    (2800.0, "410MHz"),
    (2900.0, "435MHz"),
    (3000.0, "460MHz"),
    (3100.0, "485MHz"),
    (3200.0, "510MHz"),
    (3300.0, "535MHz"),
    (3400.0, "560MHz"),
    (3500.0, "585MHz"),
    (3600.0, "610MHz"),
    (3700.0, "635MHz"),
    (3800.0, "660MHz"),
    (3900.0, "685MHz"),
];

/// What the follower last drove the miner into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Applied {
    Sleeping,
    Profile(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Plan {
    Sleep,
    Wake { profile: String },
    Apply { profile: String },
    Hold,
}

#[derive(Debug, Clone)]
pub struct SolarPlanner {
    table: Vec<(f64, String)>,
    sleep_below: f64,
}

impl Default for SolarPlanner {
    fn default() -> Self {
        Self {
            table: POWER_TABLE
                .iter()
                .map(|(watts, profile)| (*watts, profile.to_string()))
                .collect(),
            sleep_below: SLEEP_BELOW_WATTS,
        }
    }
}

impl SolarPlanner {
    /// Custom table of `(minimum watts, profile)`. Sorted here; an empty table
    /// falls back to the default one.
    pub fn new(mut table: Vec<(f64, String)>, sleep_below: f64) -> Self {
        table.retain(|(watts, _)| watts.is_finite());
        if table.is_empty() {
            return Self {
                sleep_below,
                ..Self::default()
            };
        }
        table.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { table, sleep_below }
    }

    pub fn with_sleep_below(mut self, watts: f64) -> Self {
        self.sleep_below = watts;
        self
    }

    pub fn sleep_below(&self) -> f64 {
        self.sleep_below
    }

    /// Highest profile whose threshold `watts` reaches; the lowest profile when it
    /// reaches none.
    pub fn profile_for(&self, watts: f64) -> &str {
        let watts = sanitize(watts);
        self.table
            .iter()
            .rev()
            .find(|(threshold, _)| watts >= *threshold)
            .or_else(|| self.table.first())
            .map(|(_, profile)| profile.as_str())
            .unwrap_or_default()
    }

    pub fn plan(&self, watts: f64, current: Option<&Applied>) -> Plan {
        let watts = sanitize(watts);
        if watts < self.sleep_below {
            return match current {
                Some(Applied::Sleeping) => Plan::Hold,
                _ => Plan::Sleep,
            };
        }
        let profile = self.profile_for(watts).to_string();
        match current {
            Some(Applied::Sleeping) => Plan::Wake { profile },
            Some(Applied::Profile(active)) if *active == profile => Plan::Hold,
            _ => Plan::Apply { profile },
        }
    }
}

fn sanitize(watts: f64) -> f64 {
    if watts.is_finite() && watts > 0.0 {
        watts
    } else {
        0.0
    }
}

/// Applies planner decisions to a miner, remembering what it applied so unchanged
/// power produces no commands.
pub struct SolarFollower {
    client: Arc<MinerClient>,
    planner: SolarPlanner,
    applied: Option<Applied>,
    wake_settle: Duration,
}

impl SolarFollower {
    pub fn new(client: Arc<MinerClient>, planner: SolarPlanner) -> Self {
        Self {
            client,
            planner,
            applied: None,
            wake_settle: WAKE_SETTLE,
        }
    }

    pub fn with_wake_settle(mut self, wake_settle: Duration) -> Self {
        self.wake_settle = wake_settle;
        self
    }

    pub fn applied(&self) -> Option<&Applied> {
        self.applied.as_ref()
    }

    /// Plans for `watts` and carries the plan out. On failure the remembered state
    /// is left as it was so the next step tries again.
    pub async fn step(&mut self, watts: f64) -> Result<Plan, ProtocolError> {
        let plan = self.planner.plan(watts, self.applied.as_ref());
        match &plan {
            Plan::Hold => {
                debug!(target: "luxos::solar", watts, "holding");
            }
            Plan::Sleep => {
                info!(target: "luxos::solar", watts, "insufficient solar power, sleeping");
                self.client.pause_mining().await?;
                self.applied = Some(Applied::Sleeping);
            }
            Plan::Wake { profile } => {
                info!(target: "luxos::solar", watts, profile = %profile, "solar power available, waking");
                self.client.resume_mining().await?;
                tokio::time::sleep(self.wake_settle).await;
                self.apply(watts, profile).await?;
            }
            Plan::Apply { profile } => {
                self.apply(watts, profile).await?;
            }
        }
        Ok(plan)
    }

    async fn apply(&mut self, watts: f64, profile: &str) -> Result<(), ProtocolError> {
        info!(
            target: "luxos::solar",
            watts,
            profile,
            previous = ?self.applied,
            "adjusting profile"
        );
        self.client.apply_profile(profile).await?;
        self.applied = Some(Applied::Profile(profile.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::ClientConfig;
    use crate::executor::testing::{ok, ScriptedChannel};
    use crate::transport::{Channel, ChannelKind, Request, TransportError};

    #[test]
    fn table_boundaries() {
        let planner = SolarPlanner::default();
        assert_eq!(planner.profile_for(600.0), "260MHz");
        assert_eq!(planner.profile_for(2299.9), "260MHz");
        assert_eq!(planner.profile_for(2300.0), "285MHz");
        assert_eq!(planner.profile_for(3050.0), "460MHz");
        assert_eq!(planner.profile_for(3899.0), "660MHz");
        assert_eq!(planner.profile_for(12_000.0), "685MHz");
    }

    #[test]
    fn bad_readings_count_as_no_power() {
        let planner = SolarPlanner::default();
        for watts in [f64::NAN, f64::NEG_INFINITY, -250.0] {
            assert_eq!(planner.plan(watts, None), Plan::Sleep);
        }
        assert_eq!(planner.profile_for(f64::INFINITY), "260MHz");
    }

    #[test]
    fn plan_transitions() {
        let planner = SolarPlanner::default();
        let sleeping = Applied::Sleeping;
        let at_310 = Applied::Profile("310MHz".into());

        assert_eq!(planner.plan(100.0, Some(&sleeping)), Plan::Hold);
        assert_eq!(planner.plan(100.0, Some(&at_310)), Plan::Sleep);
        assert_eq!(
            planner.plan(2450.0, Some(&sleeping)),
            Plan::Wake {
                profile: "310MHz".into()
            }
        );
        assert_eq!(planner.plan(2450.0, Some(&at_310)), Plan::Hold);
        assert_eq!(
            planner.plan(3950.0, Some(&at_310)),
            Plan::Apply {
                profile: "685MHz".into()
            }
        );
        assert_eq!(
            planner.plan(700.0, None),
            Plan::Apply {
                profile: "260MHz".into()
            }
        );
    }

    #[test]
    fn custom_table_is_sorted() {
        let planner = SolarPlanner::new(
            vec![(1000.0, "high".into()), (0.0, "low".into()), (f64::NAN, "bogus".into())],
            200.0,
        );
        assert_eq!(planner.profile_for(500.0), "low");
        assert_eq!(planner.profile_for(1500.0), "high");
        assert_eq!(planner.plan(150.0, None), Plan::Sleep);
    }

    fn device(request: &Request) -> Result<String, TransportError> {
        let body = match request.command.as_str() {
            "session" => json!({"SESSION": [{"SessionID": "TOK1"}]}),
            _ => ok("ok"),
        };
        Ok(body.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn follower_sleeps_wakes_and_holds() {
        let channel = Arc::new(ScriptedChannel::with_responder(ChannelKind::Socket, device));
        let client = Arc::new(MinerClient::with_channels(
            ClientConfig::new("miner", "root", "root"),
            vec![channel.clone() as Arc<dyn Channel>],
        ));
        let mut follower = SolarFollower::new(client, SolarPlanner::default());

        assert_eq!(follower.step(200.0).await.unwrap(), Plan::Sleep);
        assert_eq!(follower.step(300.0).await.unwrap(), Plan::Hold);

        let started = tokio::time::Instant::now();
        assert_eq!(
            follower.step(2550.0).await.unwrap(),
            Plan::Wake {
                profile: "335MHz".into()
            }
        );
        assert!(started.elapsed() >= WAKE_SETTLE);
        assert_eq!(follower.applied(), Some(&Applied::Profile("335MHz".into())));
        assert_eq!(follower.step(2599.0).await.unwrap(), Plan::Hold);

        assert_eq!(
            channel.commands(),
            vec![
                "session",
                "curtail TOK1,sleep",
                "curtail TOK1,wakeup",
                "profileset TOK1,335MHz"
            ]
        );
    }

    #[tokio::test]
    async fn failed_apply_is_retried_next_step() {
        let channel = Arc::new(ScriptedChannel::with_responder(ChannelKind::Socket, device));
        channel.push(json!({"SESSION": [{"SessionID": "TOK1"}]}));
        channel.push(crate::executor::testing::err("Profile busy"));
        let client = Arc::new(MinerClient::with_channels(
            ClientConfig::new("miner", "root", "root"),
            vec![channel.clone() as Arc<dyn Channel>],
        ));
        let mut follower = SolarFollower::new(client, SolarPlanner::default());

        assert!(follower.step(3000.0).await.is_err());
        assert_eq!(follower.applied(), None);
        assert_eq!(
            follower.step(3000.0).await.unwrap(),
            Plan::Apply {
                profile: "460MHz".into()
            }
        );
    }
}
