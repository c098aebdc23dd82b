use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Stable identity of a call record. Doubles as the timer correlation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub i64);

impl CallId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CallId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Display fields of a fake call.
///
/// Opaque to the scheduling core: stored as JSON and handed to the presenter
/// exactly as it was saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPayload {
    pub caller_name: String,
    pub caller_number: String,
    /// Avatar reference (file path or URL), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Voice clip reference played once the call is answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Name of the phone skin the call screen imitates.
    #[serde(default = "default_device_skin")]
    pub device_skin: String,
    /// How long the incoming-call screen stays up before it counts as consumed.
    pub display_duration_secs: u32,
}

impl CallPayload {
    pub fn new(caller_name: &str, caller_number: &str, display_duration_secs: u32) -> Self {
        Self {
            caller_name: caller_name.to_string(),
            caller_number: caller_number.to_string(),
            avatar: None,
            voice: None,
            device_skin: default_device_skin(),
            display_duration_secs,
        }
    }
}

fn default_device_skin() -> String {
    "default".to_string()
}

/// A persisted call record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: CallId,
    /// Offset from `created_at` until the call fires. 0 means "now".
    pub countdown_secs: u32,
    /// Creation time, or the time of the latest edit / re-trigger.
    pub created_at: DateTime<Utc>,
    /// Absolute firing time. Stored, never recomputed from the countdown.
    pub scheduled_at: DateTime<Utc>,
    pub is_active: bool,
    pub payload: CallPayload,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// True once the firing time has been reached at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }
}

/// A call record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCallRecord {
    pub countdown_secs: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub payload: CallPayload,
}

impl NewCallRecord {
    /// Derive `scheduled_at` from `now + countdown_secs`.
    pub fn new(payload: CallPayload, countdown_secs: u32, now: DateTime<Utc>) -> Self {
        Self {
            countdown_secs,
            created_at: now.trunc_subsecs(3),
            scheduled_at: scheduled_from(now, countdown_secs),
            payload,
        }
    }
}

/// Absolute firing time for a countdown started at `start`.
///
/// Truncated to milliseconds, the precision timestamps are persisted with, so
/// a stored record compares equal to the value it was armed with.
pub fn scheduled_from(start: DateTime<Utc>, countdown_secs: u32) -> DateTime<Utc> {
    (start + Duration::seconds(i64::from(countdown_secs))).trunc_subsecs(3)
}

/// Parse a countdown such as `now`, `45`, `30s`, `5m` or `1h` into seconds.
pub fn parse_countdown(input: &str) -> Result<u32> {
    let s = input.trim().to_ascii_lowercase();
    if s == "now" {
        return Ok(0);
    }
    let (digits, multiplier) = match s.chars().last() {
        Some('s') => (&s[..s.len() - 1], 1),
        Some('m') => (&s[..s.len() - 1], 60),
        Some('h') => (&s[..s.len() - 1], 3600),
        _ => (s.as_str(), 1),
    };
    let value: u32 = digits
        .parse()
        .map_err(|_| CoreError::InvalidCountdown(input.to_string()))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| CoreError::InvalidCountdown(format!("{input} is too large")))
}
