//! Per-board enable/disable.
//!
//! The on-device autotuner fights external board changes, so every mutation is
//! bracketed by an autotuner suspension: suspend, settle, mutate, verify,
//! restore. The restore runs on every exit path. An explicit `release` covers
//! errors and panics; the guard's `Drop` covers a cancelled future.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::executor::CommandExecutor;
use crate::session::{SessionManager, SessionToken};
use crate::telemetry::{find_board, parse_boards, BoardStatus};

const AUTOTUNER_COMMAND: &str = "atmset";
const AUTOTUNER_SUSPEND: &str = "enabled=false";
const AUTOTUNER_RESTORE: &str = "enabled=true";
const ENABLE_COMMAND: &str = "enableboard";
const DISABLE_COMMAND: &str = "disableboard";
const DEVS_COMMAND: &str = "devs";

/// Result of reading the board list back after a change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Verification {
    Confirmed,
    /// The device accepted the command but the board did not change. Some firmware
    /// silently ignores per-board control.
    Mismatch {
        expected: bool,
        observed: bool,
    },
    /// The read-back failed or did not mention the board.
    Unavailable { reason: String },
}

impl Verification {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Verification::Confirmed)
    }
}

#[derive(Debug, Clone)]
pub struct BoardChange {
    pub index: u32,
    pub enabled: bool,
    pub response: Envelope,
    pub verification: Verification,
}

pub struct BoardController {
    executor: Arc<CommandExecutor>,
    session: Arc<SessionManager>,
    settle: Duration,
    verify_delay: Duration,
}

impl BoardController {
    pub fn new(
        executor: Arc<CommandExecutor>,
        session: Arc<SessionManager>,
        settle: Duration,
        verify_delay: Duration,
    ) -> Self {
        Self {
            executor,
            session,
            settle,
            verify_delay,
        }
    }

    pub async fn enable_board(&self, index: u32) -> Result<BoardChange, ProtocolError> {
        self.set_board(index, true).await
    }

    pub async fn disable_board(&self, index: u32) -> Result<BoardChange, ProtocolError> {
        self.set_board(index, false).await
    }

    pub async fn boards(&self) -> Result<Vec<BoardStatus>, ProtocolError> {
        let devs = self.executor.execute(DEVS_COMMAND, "").await?;
        Ok(parse_boards(&devs))
    }

    async fn set_board(&self, index: u32, enabled: bool) -> Result<BoardChange, ProtocolError> {
        let command = if enabled { ENABLE_COMMAND } else { DISABLE_COMMAND };
        let change = self
            .session
            .run_privileged(command, |token| self.attempt(token, command, index, enabled))
            .await?;
        info!(
            target: "luxos::board",
            board = index,
            enabled,
            verified = change.verification.is_confirmed(),
            "board change applied"
        );
        Ok(change)
    }

    /// One outer attempt. The autotuner is restored before this returns, whatever
    /// the mutation did.
    async fn attempt(
        &self,
        token: SessionToken,
        command: &str,
        index: u32,
        enabled: bool,
    ) -> Result<BoardChange, ProtocolError> {
        let suspension = AutotunerSuspension::suspend(
            self.executor.clone(),
            self.session.clone(),
            token.clone(),
        )
        .await;
        tokio::time::sleep(self.settle).await;

        let outcome = AssertUnwindSafe(self.mutate_and_verify(&token, command, index, enabled))
            .catch_unwind()
            .await;

        if let Ok(Err(err)) = &outcome {
            if err.is_session_expired() {
                // Let the restore below run with a fresh session.
                self.session.invalidate_if(&token).await;
            } else {
                warn!(target: "luxos::board", board = index, error = %err, "board command failed");
            }
        }
        suspension.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn mutate_and_verify(
        &self,
        token: &SessionToken,
        command: &str,
        index: u32,
        enabled: bool,
    ) -> Result<BoardChange, ProtocolError> {
        let response = self
            .executor
            .execute(command, &format!("{token},{index}"))
            .await?;
        tokio::time::sleep(self.verify_delay).await;
        let verification = self.verify(index, enabled).await;
        Ok(BoardChange {
            index,
            enabled,
            response,
            verification,
        })
    }

    async fn verify(&self, index: u32, expected: bool) -> Verification {
        let boards = match self.boards().await {
            Ok(boards) => boards,
            Err(err) => {
                debug!(target: "luxos::board", board = index, error = %err, "read-back failed");
                return Verification::Unavailable {
                    reason: err.to_string(),
                };
            }
        };
        let Some(board) = find_board(&boards, index) else {
            return Verification::Unavailable {
                reason: format!("board {index} is not in the device list"),
            };
        };
        let Some(observed) = board.enabled else {
            return Verification::Unavailable {
                reason: format!("board {index} has no enabled flag in the device list"),
            };
        };
        if observed == expected {
            Verification::Confirmed
        } else {
            warn!(
                target: "luxos::board",
                board = index,
                expected,
                observed,
                "board state did not change; firmware may ignore per-board control"
            );
            Verification::Mismatch { expected, observed }
        }
    }
}

/// The autotuner held off for the duration of one board change.
struct AutotunerSuspension {
    executor: Arc<CommandExecutor>,
    session: Arc<SessionManager>,
    token: SessionToken,
    released: bool,
}

impl AutotunerSuspension {
    /// Best effort: a refusal is logged and the change proceeds anyway.
    async fn suspend(
        executor: Arc<CommandExecutor>,
        session: Arc<SessionManager>,
        token: SessionToken,
    ) -> Self {
        let parameter = format!("{token},{AUTOTUNER_SUSPEND}");
        match executor.execute(AUTOTUNER_COMMAND, &parameter).await {
            Ok(_) => debug!(target: "luxos::board", "autotuner suspended"),
            Err(err) => warn!(target: "luxos::board", error = %err, "autotuner suspend failed, continuing"),
        }
        Self {
            executor,
            session,
            token,
            released: false,
        }
    }

    /// Restores the autotuner with the current session, renewing it if the mutation
    /// discarded it. Failures are logged, never returned.
    async fn release(mut self) {
        let token = match self.session.ensure_session().await {
            Ok(Some(token)) => token,
            Ok(None) => self.token.clone(),
            Err(err) => {
                debug!(target: "luxos::board", error = %err, "session renewal failed, restoring with previous token");
                self.token.clone()
            }
        };
        restore(&self.executor, &token).await;
        self.released = true;
    }
}

impl Drop for AutotunerSuspension {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Cancelled mid-change. Finish the restore in the background.
        let executor = self.executor.clone();
        let token = self.token.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { restore(&executor, &token).await });
            }
            Err(_) => warn!(target: "luxos::board", "autotuner left suspended: no runtime to restore it"),
        }
    }
}

async fn restore(executor: &CommandExecutor, token: &SessionToken) {
    let parameter = format!("{token},{AUTOTUNER_RESTORE}");
    match executor.execute(AUTOTUNER_COMMAND, &parameter).await {
        Ok(_) => debug!(target: "luxos::board", "autotuner restored"),
        Err(err) => warn!(target: "luxos::board", error = %err, "autotuner restore failed"),
    }
}
