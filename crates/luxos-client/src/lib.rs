//! LuxOS miner control client.
//!
//! The device speaks a cgminer-style command protocol over two transports:
//! a null-terminated JSON frame on TCP port 4028 and a JSON `POST /api` on
//! port 8080. This crate wraps both behind a single fallback executor and
//! layers the privileged controls on top of it:
//!
//! - session acquisition with bounded retry when the device expires a token
//! - curtailment (sleep / wakeup) with tolerance for benign races
//! - dynamic performance-profile discovery and application
//! - per-board enable/disable with the autotuner suspended around the change
//! - restart, pool management and frequency changes
//!
//! Responses are schema-less across firmware revisions, so they surface as
//! a weakly-typed [`Envelope`] and each component extracts what it needs
//! defensively.

pub mod board;
pub mod client;
pub mod config;
pub mod curtail;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod maintenance;
pub mod profile;
pub mod session;
pub mod solar;
pub mod telemetry;
pub mod transport;

pub use board::{BoardChange, BoardController, Verification};
pub use client::MinerClient;
pub use config::ClientConfig;
pub use curtail::{CurtailAction, CurtailOutcome, CurtailState, CurtailmentController, Disposition};
pub use envelope::Envelope;
pub use error::{ChannelFailure, ProtocolError};
pub use executor::CommandExecutor;
pub use maintenance::{MaintenanceController, PoolSpec};
pub use profile::{ProfileController, ProfileInfo};
pub use session::{Credentials, SessionManager, SessionToken};
pub use solar::{Applied, Plan, SolarFollower, SolarPlanner};
pub use telemetry::{BoardStatus, MinerSummary, Snapshot};
pub use transport::{Channel, ChannelKind, Request, TransportError};
