use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use crate::common::{BridgeError, Result};
use crate::core::types::Bearing;

/// Which capture flow a session runs. Carried explicitly with the command and
/// used to pick the settings record, never inferred from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Registration,
    Authentication,
    LivenessDetection,
}

impl SessionKind {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "registerUser" => Some(SessionKind::Registration),
            "authenticate" => Some(SessionKind::Authentication),
            "captureLiveFace" => Some(SessionKind::LivenessDetection),
            _ => None,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            SessionKind::Registration => "registerUser",
            SessionKind::Authentication => "authenticate",
            SessionKind::LivenessDetection => "captureLiveFace",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionKind::Registration => "registration",
            SessionKind::Authentication => "authentication",
            SessionKind::LivenessDetection => "liveness detection",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegistrationSettings {
    pub user_id: String,
    #[serde(default = "default_registration_results")]
    pub number_of_results_to_collect: u32,
    #[serde(default = "default_registration_bearings")]
    pub bearings: Vec<Bearing>,
    #[serde(default = "default_expiry_time")]
    pub expiry_time: f64,
    #[serde(default)]
    pub append_if_user_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthenticationSettings {
    pub user_id: String,
    #[serde(default = "default_authentication_results")]
    pub number_of_results_to_collect: u32,
    #[serde(default = "default_expiry_time")]
    pub expiry_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LivenessDetectionSettings {
    #[serde(default = "default_liveness_results")]
    pub number_of_results_to_collect: u32,
    #[serde(default = "default_liveness_bearings")]
    pub bearings: Vec<Bearing>,
    #[serde(default = "default_expiry_time")]
    pub expiry_time: f64,
    #[serde(default)]
    pub include_face_templates_in_result: bool,
}

/// Upper bound on `numberOfResultsToCollect`.
pub const MAX_RESULTS_TO_COLLECT: u32 = 100;
/// Upper bound on `expiryTime`, in seconds.
pub const MAX_EXPIRY_SECONDS: f64 = 3600.0;

fn default_registration_results() -> u32 { 1 }
fn default_authentication_results() -> u32 { 1 }
fn default_liveness_results() -> u32 { 2 }
fn default_expiry_time() -> f64 { 30.0 }
fn default_registration_bearings() -> Vec<Bearing> { vec![Bearing::Straight] }
fn default_liveness_bearings() -> Vec<Bearing> {
    vec![Bearing::Straight, Bearing::Left, Bearing::Right]
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionSettings {
    Registration(RegistrationSettings),
    Authentication(AuthenticationSettings),
    LivenessDetection(LivenessDetectionSettings),
}

impl SessionSettings {
    /// Strictly decodes `json` as the record selected by `kind`.
    pub fn decode(kind: SessionKind, json: &str) -> Result<Self> {
        let settings = match kind {
            SessionKind::Registration => {
                SessionSettings::Registration(parse_record(kind, json)?)
            }
            SessionKind::Authentication => {
                SessionSettings::Authentication(parse_record(kind, json)?)
            }
            SessionKind::LivenessDetection => {
                SessionSettings::LivenessDetection(parse_record(kind, json)?)
            }
        };
        settings.validate()?;
        tracing::debug!("Decoded {} settings", kind);
        Ok(settings)
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            SessionSettings::Registration(_) => SessionKind::Registration,
            SessionSettings::Authentication(_) => SessionKind::Authentication,
            SessionSettings::LivenessDetection(_) => SessionKind::LivenessDetection,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            SessionSettings::Registration(s) => Some(&s.user_id),
            SessionSettings::Authentication(s) => Some(&s.user_id),
            SessionSettings::LivenessDetection(_) => None,
        }
    }

    /// Whether attachments must carry recognition templates.
    pub fn wants_templates(&self) -> bool {
        match self {
            SessionSettings::Registration(_) | SessionSettings::Authentication(_) => true,
            SessionSettings::LivenessDetection(s) => s.include_face_templates_in_result,
        }
    }

    pub fn results_to_collect(&self) -> u32 {
        match self {
            SessionSettings::Registration(s) => s.number_of_results_to_collect,
            SessionSettings::Authentication(s) => s.number_of_results_to_collect,
            SessionSettings::LivenessDetection(s) => s.number_of_results_to_collect,
        }
    }

    /// Bearing requested for the capture step at `index`. Steps cycle through the
    /// configured bearings; authentication always looks straight ahead.
    pub fn bearing_for_step(&self, index: usize) -> Bearing {
        let bearings: &[Bearing] = match self {
            SessionSettings::Registration(s) => &s.bearings,
            SessionSettings::Authentication(_) => &[Bearing::Straight],
            SessionSettings::LivenessDetection(s) => &s.bearings,
        };
        bearings[index % bearings.len()]
    }

    pub fn expiry(&self) -> Duration {
        let seconds = match self {
            SessionSettings::Registration(s) => s.expiry_time,
            SessionSettings::Authentication(s) => s.expiry_time,
            SessionSettings::LivenessDetection(s) => s.expiry_time,
        };
        Duration::try_from_secs_f64(seconds.min(MAX_EXPIRY_SECONDS))
            .unwrap_or(Duration::from_secs_f64(MAX_EXPIRY_SECONDS))
    }

    fn validate(&self) -> Result<()> {
        if let Some(user_id) = self.user_id() {
            if user_id.trim().is_empty() {
                return Err(BridgeError::Schema("`userId` must not be empty".into()));
            }
        }
        let results = self.results_to_collect();
        if results == 0 || results > MAX_RESULTS_TO_COLLECT {
            return Err(BridgeError::Schema(format!(
                "`numberOfResultsToCollect` must be between 1 and {}, got {}",
                MAX_RESULTS_TO_COLLECT, results
            )));
        }
        let (bearings_empty, expiry) = match self {
            SessionSettings::Registration(s) => (s.bearings.is_empty(), s.expiry_time),
            SessionSettings::Authentication(s) => (false, s.expiry_time),
            SessionSettings::LivenessDetection(s) => (s.bearings.is_empty(), s.expiry_time),
        };
        if bearings_empty {
            return Err(BridgeError::Schema("`bearings` must not be empty".into()));
        }
        if !(expiry.is_finite() && expiry > 0.0 && expiry <= MAX_EXPIRY_SECONDS) {
            return Err(BridgeError::Schema(format!(
                "`expiryTime` must be a positive number of seconds up to {}",
                MAX_EXPIRY_SECONDS
            )));
        }
        Ok(())
    }
}

fn parse_record<T: serde::de::DeserializeOwned>(kind: SessionKind, json: &str) -> Result<T> {
    serde_json::from_str(json)
        .map_err(|e| BridgeError::Schema(format!("invalid {} settings: {}", kind, e)))
}
