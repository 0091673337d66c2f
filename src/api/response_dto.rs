use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::utils::idset::Idset;

/// `status` response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StatusDto {
    #[serde(rename = "R")]
    pub r: serde_json::Value,
    pub online: Idset,
    pub offline: Idset,
    pub exclude: Idset,
    /// Drained ranks grouped by identical timestamp and reason.
    pub drain: BTreeMap<String, DrainInfoDto>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DrainInfoDto {
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `sched-status` response: three R objects.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SchedStatusDto {
    pub all: serde_json::Value,
    pub down: serde_json::Value,
    pub allocated: serde_json::Value,
}

/// One `acquire` response. The first carries `resources` and `up`,
/// later ones only the non-empty deltas.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AcquireResponseDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<Idset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<Idset>,
}

/// Error response on the wire.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ErrorDto {
    pub errnum: i32,
    pub errstr: String,
}

impl From<&crate::error::Error> for ErrorDto {
    fn from(err: &crate::error::Error) -> Self {
        ErrorDto { errnum: err.errnum(), errstr: err.to_string() }
    }
}
