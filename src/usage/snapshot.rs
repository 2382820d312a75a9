use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Usage metrics aggregated over a window of time, as pushed by an external
/// collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub window_hours: f64,
    pub burn_rate_per_hour: f64,
    pub total_cost_usd: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation_tokens: i64,
    pub cache_read_tokens: i64,
    pub total_tokens: i64,
    pub session_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_session_id: Option<String>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("window hours must be greater than zero")]
    NonPositiveWindow,
    #[error("timestamp is required")]
    MissingTimestamp,
    #[error("last activity timestamp is required")]
    MissingLastActivity,
    #[error("token counts must be non-negative")]
    NegativeTokens,
    #[error("total cost must be non-negative")]
    NegativeCost,
    #[error("burn rate must be non-negative")]
    NegativeBurnRate,
}

impl MetricsSnapshot {
    /// Checks every write-time invariant, reporting the first one violated.
    ///
    /// The comparisons are written so that NaN fails them.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.window_hours > 0.0) {
            return Err(ValidationError::NonPositiveWindow);
        }
        if is_unset(&self.timestamp) {
            return Err(ValidationError::MissingTimestamp);
        }
        if is_unset(&self.last_activity) {
            return Err(ValidationError::MissingLastActivity);
        }
        let tokens = [
            self.total_tokens,
            self.input_tokens,
            self.output_tokens,
            self.cache_creation_tokens,
            self.cache_read_tokens,
        ];
        if tokens.iter().any(|count| *count < 0) {
            return Err(ValidationError::NegativeTokens);
        }
        if !(self.total_cost_usd >= 0.0) {
            return Err(ValidationError::NegativeCost);
        }
        if !(self.burn_rate_per_hour >= 0.0) {
            return Err(ValidationError::NegativeBurnRate);
        }
        Ok(())
    }
}

fn is_unset(value: &DateTime<Utc>) -> bool {
    *value == DateTime::<Utc>::default()
}
