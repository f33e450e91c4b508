//! Decision values and input validation shared by every decider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Outcome of a single admission check.
///
/// This is a plain value and can be serialized straight into a response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request was admitted (and recorded).
    pub allowed: bool,
    /// Admissions inside the window after this call.
    pub used: u64,
    /// Admissions still available inside the window.
    pub remaining: u64,
    /// Width of the window the decision was taken against.
    pub window_seconds: f64,
}

impl Decision {
    /// An admission: `used` already includes the new entry.
    pub fn admitted(used: u64, limit: u64, window: Duration) -> Self {
        Self {
            allowed: true,
            used,
            remaining: limit.saturating_sub(used),
            window_seconds: window.as_secs_f64(),
        }
    }

    /// A denial: nothing was recorded.
    pub fn denied(used: u64, window: Duration) -> Self {
        Self {
            allowed: false,
            used,
            remaining: 0,
            window_seconds: window.as_secs_f64(),
        }
    }
}

/// Read-only view of a subject's current window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Admissions currently inside the window.
    pub used: u64,
    /// `limit - used`; negative only when the limit shrank mid-window.
    pub remaining: i64,
    /// Width of the window that was inspected.
    pub window_seconds: f64,
}

impl Usage {
    pub fn new(used: u64, limit: u64, window: Duration) -> Self {
        Self {
            used,
            remaining: i64::try_from(limit)
                .unwrap_or(i64::MAX)
                .saturating_sub(i64::try_from(used).unwrap_or(i64::MAX)),
            window_seconds: window.as_secs_f64(),
        }
    }
}

/// Current wall-clock time as fractional Unix seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Reject an empty subject key.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(GateError::InvalidInput("subject key must not be empty".to_string()));
    }
    Ok(())
}

/// Reject an empty key, a zero limit or a zero-width window.
pub fn validate(key: &str, limit: u64, window: Duration) -> Result<()> {
    validate_key(key)?;
    if limit == 0 {
        return Err(GateError::InvalidInput("limit must be greater than zero".to_string()));
    }
    if window.is_zero() {
        return Err(GateError::InvalidInput("window must be greater than zero".to_string()));
    }
    Ok(())
}
