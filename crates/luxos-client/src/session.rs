use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::envelope::{field, Envelope};
use crate::error::ProtocolError;
use crate::executor::CommandExecutor;

const SESSION_COMMAND: &str = "session";
const LOGIN_COMMAND: &str = "logon";
const SESSION_SECTION: &str = "SESSION";
const SESSION_KEYS: &[&str] = &["SessionID", "SessionId", "session_id"];

/// Opaque credential for privileged commands. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn login_parameter(&self) -> String {
        format!("{},{}", self.username, self.password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Owns the session token for one client. Acquisition happens under a lock so
/// concurrent callers share one login instead of racing.
pub struct SessionManager {
    executor: Arc<CommandExecutor>,
    credentials: Credentials,
    token: Mutex<Option<SessionToken>>,
    attempts: usize,
}

impl SessionManager {
    pub fn new(executor: Arc<CommandExecutor>, credentials: Credentials, attempts: usize) -> Self {
        Self {
            executor,
            credentials,
            token: Mutex::new(None),
            attempts: attempts.max(1),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub async fn current(&self) -> Option<SessionToken> {
        self.token.lock().await.clone()
    }

    /// Returns the cached token, or asks the device for its current session and
    /// logs in when there is none. `Ok(None)` means login produced no token.
    pub async fn ensure_session(&self) -> Result<Option<SessionToken>, ProtocolError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            return Ok(Some(token.clone()));
        }

        match self.query_current().await {
            Ok(Some(token)) => {
                debug!(target: "luxos::session", "adopted existing session");
                *slot = Some(token.clone());
                return Ok(Some(token));
            }
            Ok(None) => {}
            Err(err) => {
                debug!(target: "luxos::session", error = %err, "session query failed, logging in");
            }
        }

        let response = self
            .executor
            .execute(LOGIN_COMMAND, &self.credentials.login_parameter())
            .await?;
        match extract_token(&response) {
            Some(token) => {
                info!(target: "luxos::session", user = %self.credentials.username, "logged in");
                *slot = Some(token.clone());
                Ok(Some(token))
            }
            None => {
                warn!(target: "luxos::session", user = %self.credentials.username, "login returned no session id");
                Ok(None)
            }
        }
    }

    /// Like [`ensure_session`](Self::ensure_session), for privileged paths where a
    /// missing token is fatal.
    pub async fn require_session(&self) -> Result<SessionToken, ProtocolError> {
        self.ensure_session().await?.ok_or(ProtocolError::NoSession)
    }

    pub async fn invalidate(&self) {
        if self.token.lock().await.take().is_some() {
            debug!(target: "luxos::session", "session discarded");
        }
    }

    /// Discards the cached token only if it is still `stale`, so a caller holding an
    /// old token cannot throw away a session another caller just renewed.
    pub async fn invalidate_if(&self, stale: &SessionToken) {
        let mut slot = self.token.lock().await;
        if slot.as_ref() == Some(stale) {
            slot.take();
            debug!(target: "luxos::session", "stale session discarded");
        }
    }

    /// Runs `op` with a session, discarding the token and retrying the whole
    /// operation when the device reports the session expired. Bounded by the
    /// configured attempts; the last expiry error surfaces when they run out.
    pub async fn run_privileged<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ProtocolError>
    where
        F: FnMut(SessionToken) -> Fut,
        Fut: Future<Output = Result<T, ProtocolError>>,
    {
        let mut attempt = 1;
        loop {
            let token = self.require_session().await?;
            match op(token.clone()).await {
                Err(err) if err.is_session_expired() => {
                    warn!(
                        target: "luxos::session",
                        operation,
                        attempt,
                        max_attempts = self.attempts,
                        error = %err,
                        "session expired"
                    );
                    self.invalidate_if(&token).await;
                    if attempt >= self.attempts {
                        return Err(err);
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn query_current(&self) -> Result<Option<SessionToken>, ProtocolError> {
        let response = self.executor.execute(SESSION_COMMAND, "").await?;
        Ok(extract_token(&response))
    }
}

fn extract_token(response: &Envelope) -> Option<SessionToken> {
    let record = response.first(SESSION_SECTION)?;
    let token = field(record, SESSION_KEYS)?.as_str()?.trim();
    if token.is_empty() {
        None
    } else {
        Some(SessionToken::new(token))
    }
}
