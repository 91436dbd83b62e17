use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::envelope::{field, number, Envelope};
use crate::error::ProtocolError;
use crate::executor::CommandExecutor;
use crate::session::SessionManager;

const CATALOG_COMMAND: &str = "profiles";
const DETAILS_COMMAND: &str = "profileget";
const APPLY_COMMAND: &str = "profileset";
const CATALOG_SECTION: &str = "PROFILES";
const DETAILS_SECTION: &str = "PROFILE";
const NAME_KEYS: &[&str] = &["Profile Name", "ProfileName", "Name", "name"];

/// Probed one by one when the device has no usable catalog.
pub const FALLBACK_PROFILES: &[&str] = &[
    "default", "310MHz", "400MHz", "500MHz", "600MHz", "700MHz", "balanced", "eco", "max",
];

/// Every firmware ships this one.
pub const BASELINE_PROFILE: &str = "default";

/// A device-defined operating point. Any field the firmware omits is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileInfo {
    pub name: String,
    pub frequency_mhz: Option<f64>,
    pub voltage: Option<f64>,
    pub watts: Option<f64>,
    pub hashrate_ths: Option<f64>,
}

impl ProfileInfo {
    fn from_record(record: &Map<String, Value>, fallback_name: Option<&str>) -> Option<Self> {
        let name = field(record, NAME_KEYS)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or(fallback_name)?
            .to_string();
        let read = |keys: &[&str]| field(record, keys).and_then(number);
        Some(Self {
            name,
            frequency_mhz: read(&["Frequency", "frequency"]),
            voltage: read(&["Voltage", "voltage"]),
            watts: read(&["Watts", "watts", "Power"]),
            hashrate_ths: read(&["Hashrate", "hashrate", "HashrateTHs"]),
        })
    }
}

pub struct ProfileController {
    executor: Arc<CommandExecutor>,
    session: Arc<SessionManager>,
}

impl ProfileController {
    pub fn new(executor: Arc<CommandExecutor>, session: Arc<SessionManager>) -> Self {
        Self { executor, session }
    }

    /// Profile names the device supports. Never empty: falls back to probing known
    /// names, and to the baseline profile when nothing answers.
    pub async fn list_profiles(&self) -> Vec<String> {
        match self.catalog().await {
            Ok(catalog) if !catalog.is_empty() => {
                let mut names: Vec<String> = Vec::with_capacity(catalog.len());
                for info in catalog {
                    if !names.contains(&info.name) {
                        names.push(info.name);
                    }
                }
                return names;
            }
            Ok(_) => debug!(target: "luxos::profile", "catalog empty, probing known profiles"),
            Err(err @ ProtocolError::Rejected { .. }) => {
                debug!(target: "luxos::profile", error = %err, "catalog unsupported, probing known profiles")
            }
            Err(err) => {
                warn!(target: "luxos::profile", error = %err, "catalog unavailable, assuming baseline only");
                return vec![BASELINE_PROFILE.to_string()];
            }
        }

        let mut found = Vec::new();
        for name in FALLBACK_PROFILES {
            match self.profile_details(name).await {
                Ok(_) => found.push(name.to_string()),
                Err(err) => debug!(target: "luxos::profile", profile = name, error = %err, "probe failed"),
            }
        }
        if found.is_empty() {
            warn!(target: "luxos::profile", "no profiles discovered, assuming baseline only");
            found.push(BASELINE_PROFILE.to_string());
        }
        found
    }

    /// Structured entries from the catalog command. Entries without a name are skipped.
    pub async fn catalog(&self) -> Result<Vec<ProfileInfo>, ProtocolError> {
        let response = self.executor.execute(CATALOG_COMMAND, "").await?;
        Ok(parse_catalog(&response))
    }

    pub async fn profile_details(&self, name: &str) -> Result<ProfileInfo, ProtocolError> {
        validate_name(name)?;
        let response = self.executor.execute(DETAILS_COMMAND, name).await?;
        response
            .first(DETAILS_SECTION)
            .and_then(|record| ProfileInfo::from_record(record, Some(name)))
            .ok_or_else(|| ProtocolError::Rejected {
                command: DETAILS_COMMAND.to_string(),
                message: format!("no details for profile '{name}'"),
            })
    }

    /// Applies `name` device-wide. Not read back: profile changes take longer to show
    /// in telemetry than a poll interval.
    pub async fn apply_profile(&self, name: &str) -> Result<Envelope, ProtocolError> {
        validate_name(name)?;
        let executor = &self.executor;
        let response = self
            .session
            .run_privileged(APPLY_COMMAND, |token| async move {
                executor
                    .execute(APPLY_COMMAND, &format!("{token},{name}"))
                    .await
            })
            .await?;
        info!(target: "luxos::profile", profile = name, "profile applied");
        Ok(response)
    }
}

fn parse_catalog(response: &Envelope) -> Vec<ProfileInfo> {
    response
        .section(CATALOG_SECTION)
        .iter()
        .filter_map(|entry| match entry {
            Value::Object(record) => ProfileInfo::from_record(record, None),
            Value::String(name) if !name.trim().is_empty() => Some(ProfileInfo {
                name: name.trim().to_string(),
                frequency_mhz: None,
                voltage: None,
                watts: None,
                hashrate_ths: None,
            }),
            _ => None,
        })
        .collect()
}

fn validate_name(name: &str) -> Result<(), ProtocolError> {
    if name.trim().is_empty() {
        return Err(ProtocolError::InvalidRequest("profile name is empty".into()));
    }
    if name.contains(',') {
        return Err(ProtocolError::InvalidRequest(format!(
            "profile name '{name}' contains the field separator ','"
        )));
    }
    Ok(())
}
