//! Dashboard HTTP API response types

use serde::Deserialize;
use serde_json::Value;

/// Response of refresh endpoints, a success flag and the refreshed data set.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    /// false when server failed to refresh
    pub success: bool,
    /// refreshed data set, differ for each endpoint
    #[serde(default)]
    pub data: Value,
    /// error message, may exist when success is false
    #[serde(default)]
    pub error: Option<String>,
}
