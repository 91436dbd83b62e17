use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProtocolError;

pub const STATUS_SECTION: &str = "STATUS";
pub const RESULT_KEY: &str = "result";

const SESSION_EXPIRED_MARKER: &str = "invalid session_id";

/// A device response. Kept as a JSON map because section names and layouts vary by
/// firmware; callers pull what they need through the defensive accessors below.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Envelope {
    body: Map<String, Value>,
}

impl Envelope {
    /// Parses a response body. Non-JSON text and JSON that is not an object are
    /// wrapped as `{"result": ...}` rather than rejected.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(body)) => Self { body },
            Ok(other) => Self::wrap(other),
            Err(_) => Self::wrap(Value::String(text.to_string())),
        }
    }

    fn wrap(value: Value) -> Self {
        let mut body = Map::new();
        body.insert(RESULT_KEY.to_string(), value);
        Self { body }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Entries of a named result section; empty when the section is absent or not a list.
    pub fn section(&self, name: &str) -> &[Value] {
        match self.body.get(name) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        }
    }

    pub fn first(&self, name: &str) -> Option<&Map<String, Value>> {
        self.section(name).first().and_then(Value::as_object)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.body.contains_key(name)
    }

    /// First status record. Some firmware sends a bare object instead of a list.
    pub fn status(&self) -> Option<&Map<String, Value>> {
        match self.body.get(STATUS_SECTION)? {
            Value::Array(items) => items.first().and_then(Value::as_object),
            Value::Object(record) => Some(record),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<&str> {
        match self.body.get(STATUS_SECTION)? {
            Value::String(code) => Some(code.as_str()),
            _ => self.status()?.get("STATUS")?.as_str(),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.status()?.get("Msg")?.as_str()
    }

    /// True unless a status record reports something other than success or info.
    /// A missing status section is not a failure: some commands return only data.
    pub fn is_success(&self) -> bool {
        match self.status_code() {
            Some(code) => is_success_code(code),
            None => true,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        !self.is_success() && self.message().is_some_and(is_session_expired_message)
    }

    /// Converts a failure status into the matching error.
    pub fn check(&self, command: &str) -> Result<(), ProtocolError> {
        if self.is_success() {
            return Ok(());
        }
        let message = self
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| format!("status {}", self.status_code().unwrap_or("?")));
        if is_session_expired_message(&message) {
            Err(ProtocolError::SessionExpired {
                command: command.to_string(),
                message,
            })
        } else {
            Err(ProtocolError::Rejected {
                command: command.to_string(),
                message,
            })
        }
    }

    pub fn into_result(self, command: &str) -> Result<Self, ProtocolError> {
        self.check(command)?;
        Ok(self)
    }
}

impl From<Map<String, Value>> for Envelope {
    fn from(body: Map<String, Value>) -> Self {
        Self { body }
    }
}

fn is_success_code(code: &str) -> bool {
    matches!(code.trim(), "S" | "I") || code.trim().eq_ignore_ascii_case("ok")
}

pub(crate) fn is_session_expired_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains(SESSION_EXPIRED_MARKER)
}

/// Reads a number that firmware may send as a JSON number or a numeric string.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a flag sent as a bool, `Y`/`N`, or `true`/`false` text.
pub(crate) fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" | "1" | "enabled" => Some(true),
            "n" | "no" | "false" | "0" | "disabled" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// First key present in `record`, so callers can accept renamed fields across firmware.
pub(crate) fn field<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| record.get(*key))
}
