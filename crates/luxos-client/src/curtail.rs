use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::executor::CommandExecutor;
use crate::session::SessionManager;

const CURTAIL_COMMAND: &str = "curtail";

/// Last state this client drove the device into. Starts unknown because the
/// device may have been curtailed by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurtailState {
    Unknown,
    Active,
    Curtailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurtailAction {
    Sleep,
    Wakeup,
}

impl CurtailAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CurtailAction::Sleep => "sleep",
            CurtailAction::Wakeup => "wakeup",
        }
    }

    fn target(self) -> CurtailState {
        match self {
            CurtailAction::Sleep => CurtailState::Curtailed,
            CurtailAction::Wakeup => CurtailState::Active,
        }
    }
}

impl fmt::Display for CurtailAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the device answered a curtail command that counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    /// Wakeup on a device that was already mining.
    AlreadyActive,
    /// The device reported it is idle or sleeping, i.e. mid-transition on its own.
    Transitioning,
}

#[derive(Debug, Clone)]
pub struct CurtailOutcome {
    pub action: CurtailAction,
    pub disposition: Disposition,
    pub response: Envelope,
}

pub struct CurtailmentController {
    executor: Arc<CommandExecutor>,
    session: Arc<SessionManager>,
    state: Mutex<CurtailState>,
}

impl CurtailmentController {
    pub fn new(executor: Arc<CommandExecutor>, session: Arc<SessionManager>) -> Self {
        Self {
            executor,
            session,
            state: Mutex::new(CurtailState::Unknown),
        }
    }

    pub fn state(&self) -> CurtailState {
        *self.state.lock()
    }

    pub async fn pause(&self) -> Result<CurtailOutcome, ProtocolError> {
        self.apply(CurtailAction::Sleep).await
    }

    pub async fn resume(&self) -> Result<CurtailOutcome, ProtocolError> {
        self.apply(CurtailAction::Wakeup).await
    }

    /// The command is sent even when local state already matches: the device may
    /// have changed state behind our back.
    async fn apply(&self, action: CurtailAction) -> Result<CurtailOutcome, ProtocolError> {
        let executor = &self.executor;
        let outcome = self
            .session
            .run_privileged(CURTAIL_COMMAND, |token| async move {
                let parameter = format!("{token},{action}");
                let response = executor.send(CURTAIL_COMMAND, &parameter).await?;
                let disposition = classify(action, &response)?;
                Ok(CurtailOutcome {
                    action,
                    disposition,
                    response,
                })
            })
            .await?;

        let previous = std::mem::replace(&mut *self.state.lock(), action.target());
        info!(
            target: "luxos::curtail",
            action = %action,
            disposition = ?outcome.disposition,
            previous = ?previous,
            "curtail applied"
        );
        Ok(outcome)
    }
}

fn classify(action: CurtailAction, response: &Envelope) -> Result<Disposition, ProtocolError> {
    let Err(err) = response.check(CURTAIL_COMMAND) else {
        return Ok(Disposition::Applied);
    };
    let message = err.device_message().unwrap_or_default().to_ascii_lowercase();
    if action == CurtailAction::Wakeup && message.contains("already active") {
        Ok(Disposition::AlreadyActive)
    } else if message.contains("idle or sleep") {
        Ok(Disposition::Transitioning)
    } else {
        Err(err)
    }
}
