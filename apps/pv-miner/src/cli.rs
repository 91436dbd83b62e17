use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "pv-miner",
    author,
    version,
    about = "Control a LuxOS miner and follow available solar power"
)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Default, Args)]
pub struct ConnectionArgs {
    /// Optional TOML settings file; PV_MINER__* environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Miner hostname or IP address.
    #[arg(long, global = true, env = "PV_MINER_HOST")]
    pub host: Option<String>,

    #[arg(long, global = true, env = "PV_MINER_USERNAME")]
    pub username: Option<String>,

    #[arg(long, global = true, env = "PV_MINER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Per-attempt transport deadline.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check that the miner answers.
    Probe,
    /// Print a telemetry summary.
    Stats {
        /// Print the raw responses instead of the summary.
        #[arg(long)]
        raw: bool,
    },
    /// List hashboards and their state.
    Boards,
    /// Curtail mining (sleep).
    Pause,
    /// Resume mining (wakeup).
    Resume,
    /// List the profiles the miner supports.
    Profiles {
        /// Include frequency, voltage, power and hashrate per profile.
        #[arg(long)]
        details: bool,
    },
    /// Apply a performance profile.
    Profile { name: String },
    /// Enable or disable one hashboard.
    Board {
        index: u32,
        #[arg(value_enum)]
        action: BoardAction,
    },
    /// Restart the mining process.
    Restart,
    /// Add or switch mining pools.
    Pool {
        #[command(subcommand)]
        action: PoolAction,
    },
    /// Set the chip frequency on every board.
    Frequency { mhz: u32 },
    /// Show what the solar follower would do for a power reading.
    Plan {
        #[arg(allow_negative_numbers = true)]
        watts: f64,
        /// Profile currently applied, or `sleep`.
        #[arg(long)]
        current: Option<String>,
    },
    /// Follow available solar power read from a file.
    Follow {
        /// File holding the available power in watts.
        #[arg(long)]
        watts_file: PathBuf,
        /// Seconds between adjustments; defaults to the configured interval.
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Debug, Subcommand)]
pub enum PoolAction {
    /// Register a new pool.
    Add {
        url: String,
        user: String,
        #[arg(long, default_value = "x")]
        password: String,
    },
    /// Make the pool with this device id active.
    Switch { id: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BoardAction {
    Enable,
    Disable,
}
