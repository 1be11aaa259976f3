//! Liveness watchdog for the scheduled run itself

use chrono::{DateTime, TimeDelta, Utc};

use super::model::{build_alert_id, AlertLevel, AlertPayload};
use crate::state::RunMeta;

/// Compare `now` with the last successful run and flip the edge-triggered
/// `watchdog_alerted` flag, returning the alert for a flip if there is one
pub fn evaluate_watchdog(meta: &mut RunMeta, now: DateTime<Utc>, max_silence: TimeDelta) -> Option<AlertPayload> {
    let last = meta.last_successful_run?;
    let silent_for = now - last;

    if silent_for >= max_silence && !meta.watchdog_alerted {
        meta.watchdog_alerted = true;
        return Some(
            AlertPayload::new(
                build_alert_id("watchdog", "silent", now),
                "watchdog",
                AlertLevel::Warning,
                "⚠️ Monitor watchdog",
                format!(
                    "No successful monitor run detected for {} minutes.",
                    silent_for.num_minutes()
                ),
                now,
            )
            .with_tag("watchdog"),
        );
    }

    if silent_for < max_silence && meta.watchdog_alerted {
        meta.watchdog_alerted = false;
        return Some(
            AlertPayload::new(
                build_alert_id("watchdog", "recovered", now),
                "watchdog",
                AlertLevel::Resolved,
                "🟢 Monitor watchdog recovered",
                "Successful monitor runs resumed.",
                now,
            )
            .with_tag("watchdog"),
        );
    }

    None
}
