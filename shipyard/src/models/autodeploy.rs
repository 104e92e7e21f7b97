//! Continuous deployment configuration models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Allowed polling intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "u32", from = "u32")]
pub enum PollInterval {
    #[default]
    FiveMinutes,
    TenMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    SixtyMinutes,
}

impl PollInterval {
    pub const ALLOWED_MINUTES: [u32; 5] = [5, 10, 15, 30, 60];

    /// Map a requested value onto the enumerated set; anything else becomes 5
    pub fn from_minutes(minutes: u32) -> Self {
        match minutes {
            10 => PollInterval::TenMinutes,
            15 => PollInterval::FifteenMinutes,
            30 => PollInterval::ThirtyMinutes,
            60 => PollInterval::SixtyMinutes,
            _ => PollInterval::FiveMinutes,
        }
    }

    pub fn minutes(&self) -> u32 {
        match self {
            PollInterval::FiveMinutes => 5,
            PollInterval::TenMinutes => 10,
            PollInterval::FifteenMinutes => 15,
            PollInterval::ThirtyMinutes => 30,
            PollInterval::SixtyMinutes => 60,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes()))
    }
}

impl From<u32> for PollInterval {
    fn from(minutes: u32) -> Self {
        PollInterval::from_minutes(minutes)
    }
}

impl From<PollInterval> for u32 {
    fn from(interval: PollInterval) -> Self {
        interval.minutes()
    }
}

/// Per-project continuous deployment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoDeployConfig {
    /// Row id, doubles as the public webhook id
    pub id: i64,
    pub owner: String,
    pub project: String,
    pub branch: String,

    /// Polling enabled
    pub enabled: bool,

    pub webhook_enabled: bool,

    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,

    pub interval: PollInterval,
    pub last_check: Option<DateTime<Utc>>,
    pub last_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutoDeployConfig {
    /// Whether the polling check should run at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_check {
            Some(last_check) => now >= last_check + self.interval.duration(),
            None => true,
        }
    }
}
