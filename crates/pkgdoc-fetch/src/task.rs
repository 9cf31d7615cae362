//! Fetch task state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Deduplication key: at most one fetch per key runs at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchKey {
    /// Module path.
    pub module_path: String,
    /// Requested version, as written (`latest`, `master`, or concrete).
    pub version: String,
}

impl FetchKey {
    /// Create a key.
    pub fn new(module_path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.module_path, self.version)
    }
}

/// Lifecycle state of a fetch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Pending,
    /// A worker is executing the fetch.
    Running,
    /// Fetched and stored.
    Succeeded,
    /// Last attempt failed.
    Failed {
        /// Whether a later request may retry the fetch.
        retryable: bool,
    },
}

impl TaskStatus {
    /// Whether the task has settled for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { retryable: false })
    }
}

/// In-memory fetch task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTask {
    /// Deduplication key.
    pub key: FetchKey,
    /// Number of attempts started.
    pub attempts: u32,
    /// Current state.
    pub status: TaskStatus,
    /// Earliest time a retry may start.
    pub next_eligible_at: DateTime<Utc>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Durable status code of the most recent outcome.
    pub status_code: Option<u16>,
    /// When the task was first scheduled.
    pub created_at: DateTime<Utc>,
    /// When the most recent attempt finished.
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl FetchTask {
    /// A new pending task.
    pub fn new(key: FetchKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            attempts: 0,
            status: TaskStatus::Pending,
            next_eligible_at: now,
            last_error: None,
            status_code: None,
            created_at: now,
            last_processed_at: None,
        }
    }
}

/// Exponential backoff after `attempts` failed attempts: `initial * 2^(attempts-1)`,
/// capped at `max`.
pub fn backoff(attempts: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    initial
        .checked_mul(1 << exponent)
        .map_or(max, |delay| delay.min(max))
}

/// `now + delay`, saturating at the latest representable time.
pub(crate) fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let initial = Duration::from_secs(30);
        let max = Duration::from_secs(200);
        let delays: Vec<u64> = (1..=5)
            .map(|n| backoff(n, initial, max).as_secs())
            .collect();
        assert_eq!(delays, vec![30, 60, 120, 200, 200]);
    }

    #[test]
    fn test_backoff_saturates() {
        let max = Duration::from_secs(3600);
        assert_eq!(backoff(u32::MAX, Duration::from_secs(30), max), max);
        assert_eq!(backoff(0, Duration::from_secs(30), max), Duration::from_secs(30));
    }

    #[test]
    fn test_add_delay_saturates() {
        let now = Utc::now();
        assert_eq!(add_delay(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert!(add_delay(now, Duration::from_secs(1)) > now);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed { retryable: false }.is_terminal());
        assert!(!TaskStatus::Failed { retryable: true }.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(FetchKey::new("github.com/a/b", "v1.0.0").to_string(), "github.com/a/b@v1.0.0");
    }
}
