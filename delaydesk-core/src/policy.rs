use serde::Deserialize;

/// Tunables for the delay workflow, loaded from the `workflow` config section.
#[derive(Debug, Deserialize, Clone)]
pub struct DelayPolicy {
    /// Upper bound on waiting for a row lock held by another caller.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Attempts per operation when storage reports contention.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Trailing window of the per-vendor delay report.
    #[serde(default = "default_report_window_days")]
    pub report_window_days: i64,
}

fn default_lock_timeout_ms() -> u64 { 2_000 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 50 }
fn default_report_window_days() -> i64 { 7 }

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            report_window_days: default_report_window_days(),
        }
    }
}
