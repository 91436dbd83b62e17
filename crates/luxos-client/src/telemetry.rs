//! Typed views over the read-only telemetry commands.
//!
//! Field names drift between firmware revisions, so every extraction here is
//! optional and tries a few spellings before giving up.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::envelope::{field, flag, number, Envelope};

const DEVS_SECTION: &str = "DEVS";
const STATS_SECTION: &str = "STATS";
const POOLS_SECTION: &str = "POOLS";
const POWER_SECTION: &str = "POWER";
const FANS_SECTION: &str = "FANS";

/// Below this the miner is idle or curtailed rather than hashing.
pub const MINING_THRESHOLD_THS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardStatus {
    /// Device-assigned board id (`ASC`), or list position when absent.
    pub index: u32,
    pub enabled: Option<bool>,
    pub status: Option<String>,
    pub user_shutdown: Option<bool>,
    pub hashrate_ths: Option<f64>,
    pub temperature: Option<f64>,
}

impl BoardStatus {
    fn from_record(position: usize, record: &Map<String, Value>) -> Self {
        let index = field(record, &["ASC", "ID", "Index"])
            .and_then(number)
            .filter(|id| *id >= 0.0)
            .map(|id| id as u32)
            .unwrap_or(position as u32);
        let user_shutdown = field(record, &["IsUserShutdown", "UserShutdown"]).and_then(flag);
        let enabled = field(record, &["Enabled", "enabled"])
            .and_then(flag)
            .or(user_shutdown.map(|shutdown| !shutdown));
        Self {
            index,
            enabled,
            status: field(record, &["Status", "status"])
                .and_then(Value::as_str)
                .map(str::to_string),
            user_shutdown,
            hashrate_ths: field(record, &["MHS 5s", "MHS av"])
                .and_then(number)
                .map(|mhs| mhs / 1_000_000.0),
            temperature: field(record, &["Temperature", "temp"]).and_then(number),
        }
    }
}

/// Boards from a `devs` response, in device order.
pub fn parse_boards(devs: &Envelope) -> Vec<BoardStatus> {
    devs.section(DEVS_SECTION)
        .iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            entry
                .as_object()
                .map(|record| BoardStatus::from_record(position, record))
        })
        .collect()
}

/// Finds a board by index. Records without an id were already indexed by
/// list position in [`parse_boards`], so an unmatched index means no such board.
pub fn find_board(boards: &[BoardStatus], index: u32) -> Option<&BoardStatus> {
    boards.iter().find(|board| board.index == index)
}

/// The raw responses of one poll. Only `stats` is mandatory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub stats: Envelope,
    pub devs: Option<Envelope>,
    pub pools: Option<Envelope>,
    pub power: Option<Envelope>,
    pub temps: Option<Envelope>,
    pub fans: Option<Envelope>,
}

impl Snapshot {
    pub fn boards(&self) -> Vec<BoardStatus> {
        self.devs.as_ref().map(parse_boards).unwrap_or_default()
    }

    pub fn summary(&self) -> MinerSummary {
        MinerSummary::from_snapshot(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MinerSummary {
    pub hashrate_ths: f64,
    pub power_watts: Option<f64>,
    pub temp_max: Option<f64>,
    pub fan_rpm: Option<f64>,
    pub uptime_secs: Option<u64>,
    /// Joules per terahash.
    pub efficiency: Option<f64>,
    pub pool_url: Option<String>,
    pub boards_total: usize,
    pub boards_enabled: usize,
    pub mining: bool,
}

impl MinerSummary {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        // STATS[0] is the version record; per-miner counters live in STATS[1].
        let stats = snapshot
            .stats
            .section(STATS_SECTION)
            .get(1)
            .or_else(|| snapshot.stats.section(STATS_SECTION).first())
            .and_then(Value::as_object);

        let hashrate_ths = stats
            .and_then(|record| field(record, &["GHS 5s", "GHS av"]))
            .and_then(number)
            .map(|ghs| ghs / 1000.0)
            .unwrap_or(0.0);
        let temp_max = stats
            .and_then(|record| field(record, &["temp_max", "Temp Max"]))
            .and_then(number);
        let uptime_secs = stats
            .and_then(|record| field(record, &["Elapsed", "elapsed"]))
            .and_then(number)
            .filter(|secs| *secs >= 0.0)
            .map(|secs| secs as u64);

        let power_watts = snapshot
            .power
            .as_ref()
            .and_then(|power| power.first(POWER_SECTION))
            .and_then(|record| field(record, &["Watts", "Power"]))
            .and_then(number);

        let fan_rpm = snapshot
            .fans
            .as_ref()
            .and_then(|fans| average_rpm(fans.section(FANS_SECTION)))
            .or_else(|| stats.and_then(stats_fan_average));

        let pool_url = snapshot.pools.as_ref().and_then(active_pool);

        let efficiency = match power_watts {
            Some(watts) if hashrate_ths > 0.0 => Some(watts / hashrate_ths),
            _ => None,
        };

        let boards = snapshot.boards();
        Self {
            hashrate_ths,
            power_watts,
            temp_max,
            fan_rpm,
            uptime_secs,
            efficiency,
            pool_url,
            boards_total: boards.len(),
            boards_enabled: boards
                .iter()
                .filter(|board| board.enabled.unwrap_or(false))
                .count(),
            mining: hashrate_ths > MINING_THRESHOLD_THS,
        }
    }
}

fn average_rpm(fans: &[Value]) -> Option<f64> {
    let speeds: Vec<f64> = fans
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|record| field(record, &["RPM", "Speed"]).and_then(number))
        .filter(|rpm| *rpm > 0.0)
        .collect();
    mean(&speeds)
}

fn stats_fan_average(stats: &Map<String, Value>) -> Option<f64> {
    let speeds: Vec<f64> = ["fan1", "fan2", "fan3", "fan4"]
        .iter()
        .filter_map(|key| stats.get(*key).and_then(number))
        .filter(|rpm| *rpm > 0.0)
        .collect();
    mean(&speeds)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn active_pool(pools: &Envelope) -> Option<String> {
    let records: Vec<&Map<String, Value>> = pools
        .section(POOLS_SECTION)
        .iter()
        .filter_map(Value::as_object)
        .collect();
    records
        .iter()
        .find(|record| {
            field(record, &["Stratum Active", "Active"])
                .and_then(flag)
                .unwrap_or(false)
        })
        .or_else(|| records.first())
        .and_then(|record| field(record, &["URL", "Url"]))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(value: Value) -> Envelope {
        Envelope::parse(&value.to_string())
    }

    #[test]
    fn boards_read_enabled_flag_variants() {
        let devs = envelope(json!({"DEVS": [
            {"ASC": 0, "Enabled": "Y", "Status": "Alive", "MHS 5s": 40_000_000.0, "Temperature": 61.5},
            {"ASC": 1, "Enabled": "N", "Status": "Dead"},
            {"ASC": 2, "IsUserShutdown": true},
            "garbage"
        ]}));
        let boards = parse_boards(&devs);
        assert_eq!(boards.len(), 3);
        assert_eq!(boards[0].enabled, Some(true));
        assert_eq!(boards[0].hashrate_ths, Some(40.0));
        assert_eq!(boards[1].enabled, Some(false));
        assert_eq!(boards[2].enabled, Some(false));
        assert_eq!(boards[2].user_shutdown, Some(true));
    }

    #[test]
    fn find_board_matches_reported_id_only() {
        let devs = envelope(json!({"DEVS": [{"ASC": 2, "Enabled": "Y"}, {"ASC": 0, "Enabled": "N"}]}));
        let boards = parse_boards(&devs);
        assert_eq!(find_board(&boards, 0).and_then(|b| b.enabled), Some(false));
        // Position 1 holds ASC 0; it must not stand in for a board 1 that does not exist.
        assert!(find_board(&boards, 1).is_none());
        assert!(find_board(&boards, 5).is_none());
    }

    #[test]
    fn summary_combines_sections() {
        let snapshot = Snapshot {
            stats: envelope(json!({"STATS": [
                {"STATS": 0, "ID": "version"},
                {"GHS 5s": "100000", "temp_max": 72, "Elapsed": 3600, "fan1": 3000, "fan2": 3200}
            ]})),
            devs: Some(envelope(json!({"DEVS": [{"ASC": 0, "Enabled": "Y"}, {"ASC": 1, "Enabled": "N"}]}))),
            pools: Some(envelope(json!({"POOLS": [
                {"URL": "stratum+tcp://backup:3333", "Stratum Active": false},
                {"URL": "stratum+tcp://main:3333", "Stratum Active": true}
            ]}))),
            power: Some(envelope(json!({"POWER": [{"Watts": 3000}]}))),
            temps: None,
            fans: None,
        };
        let summary = snapshot.summary();
        assert_eq!(summary.hashrate_ths, 100.0);
        assert_eq!(summary.power_watts, Some(3000.0));
        assert_eq!(summary.efficiency, Some(30.0));
        assert_eq!(summary.fan_rpm, Some(3100.0));
        assert_eq!(summary.uptime_secs, Some(3600));
        assert_eq!(summary.pool_url.as_deref(), Some("stratum+tcp://main:3333"));
        assert_eq!(summary.boards_total, 2);
        assert_eq!(summary.boards_enabled, 1);
        assert!(summary.mining);
    }

    #[test]
    fn fans_section_wins_over_stats_fields() {
        let snapshot = Snapshot {
            stats: envelope(json!({"STATS": [{}, {"fan1": 1000}]})),
            fans: Some(envelope(json!({"FANS": [{"RPM": 4000}, {"RPM": 0}, {"RPM": 5000}]}))),
            ..Snapshot::default()
        };
        assert_eq!(snapshot.summary().fan_rpm, Some(4500.0));
    }

    #[test]
    fn idle_miner_is_not_mining() {
        let snapshot = Snapshot {
            stats: envelope(json!({"STATS": [{}, {"GHS 5s": 500}]})),
            power: Some(envelope(json!({"POWER": [{"Watts": 90}]}))),
            ..Snapshot::default()
        };
        let summary = snapshot.summary();
        assert!(!summary.mining);
        assert_eq!(summary.efficiency, Some(180.0));
    }

    #[test]
    fn empty_snapshot_is_all_none() {
        let summary = Snapshot::default().summary();
        assert_eq!(summary.hashrate_ths, 0.0);
        assert_eq!(summary.efficiency, None);
        assert_eq!(summary.pool_url, None);
        assert!(!summary.mining);
    }
}
