//! Interval gating of target checks

use chrono::{DateTime, TimeDelta, Utc};

/// A target is due when it was never checked or its interval has fully elapsed
pub fn should_run(last_checked: Option<DateTime<Utc>>, interval: TimeDelta, now: DateTime<Utc>) -> bool {
    last_checked.map_or(true, |last| now - last >= interval)
}
