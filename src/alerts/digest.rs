//! Daily digest

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;

use super::model::{AlertLevel, AlertPayload};
use crate::state::DigestLog;

/// When the digest goes out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DigestSchedule {
    /// Local hour from which the digest may be sent
    pub hour_local: u32,
    pub tz: Tz,
}

impl Default for DigestSchedule {
    fn default() -> Self {
        Self {
            hour_local: 8,
            tz: chrono_tz::Europe::Lisbon,
        }
    }
}

impl DigestSchedule {
    /// Local date to stamp on a digest sent now, or `None` if today's digest
    /// was already sent or the local hour has not been reached
    pub fn due(&self, last_sent: Option<NaiveDate>, now: DateTime<Utc>) -> Option<NaiveDate> {
        let local = now.with_timezone(&self.tz);
        let today = local.date_naive();
        if last_sent == Some(today) || local.hour() < self.hour_local {
            return None;
        }
        Some(today)
    }
}

fn count_by_target<'a>(targets: impl Iterator<Item = &'a str>) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for target in targets {
        *counts.entry(target).or_default() += 1;
    }
    counts
        .iter()
        .map(|(target, count)| format!("{}: {}", target, count))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Summary of the last 24 hours of changes and failed checks.
///
/// `date` is the local date returned by [`DigestSchedule::due`]; it keys the
/// alert id so each local day gets its own digest.
pub fn build_daily_digest(log: &DigestLog, date: NaiveDate, now: DateTime<Utc>, target_count: usize) -> AlertPayload {
    let cutoff = now - TimeDelta::hours(24);
    let changes: Vec<_> = log.changes.iter().filter(|c| c.occurred_at >= cutoff).collect();
    let failed: Vec<_> = log.failed_checks.iter().filter(|f| f.occurred_at >= cutoff).collect();

    let body = if changes.is_empty() && failed.is_empty() {
        format!(
            "✅ All quiet: 0 changes detected across {} targets in the last 24h",
            target_count
        )
    } else {
        let mut parts = vec![
            "Last 24h summary:".to_string(),
            format!("- total changes: {}", changes.len()),
            format!("- alerts sent: {}", log.alerts_sent),
        ];
        if !changes.is_empty() {
            parts.push(format!(
                "- changes by target: {}",
                count_by_target(changes.iter().map(|c| c.target.as_str()))
            ));
        }
        if !failed.is_empty() {
            parts.push(format!(
                "- failed checks: {}",
                count_by_target(failed.iter().map(|f| f.target.as_str()))
            ));
        }
        parts.join("\n")
    };

    AlertPayload::new(
        format!("daily-digest-{}", date),
        "daily_digest",
        AlertLevel::Info,
        "🧾 Daily digest",
        body,
        now,
    )
    .with_tag("digest")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::ChangeEvent;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn test_all_quiet() {
        let log = DigestLog::default();
        let digest = build_daily_digest(&log, today(), now(), 8);
        assert!(digest.body.contains("All quiet"));
        assert!(digest.body.contains("8 targets"));
        assert_eq!(digest.alert_id, "daily-digest-2024-05-01");
    }

    #[test]
    fn test_counts_recent_entries_only() {
        let mut log = DigestLog::default();
        let recent = now() - TimeDelta::hours(1);
        let stale = now() - TimeDelta::hours(30);
        for (target, at) in [("x_status", recent), ("x_status", recent), ("twitterapi_status", recent), ("x_status", stale)] {
            log.record_change(&ChangeEvent::new(target, "x", "change", at));
        }
        log.record_failed_check("x_status", "timeout", true, recent);
        log.alerts_sent = 3;

        let body = build_daily_digest(&log, today(), now(), 8).body;
        assert!(body.contains("total changes: 3"));
        assert!(body.contains("twitterapi_status: 1, x_status: 2"));
        assert!(body.contains("failed checks: x_status: 1"));
        assert!(body.contains("alerts sent: 3"));
    }

    #[test]
    fn test_failures_alone_break_the_quiet() {
        let mut log = DigestLog::default();
        log.record_failed_check("api_tweets", "HTTP 500", true, now());
        let body = build_daily_digest(&log, today(), now(), 8).body;
        assert!(!body.contains("All quiet"));
        assert!(!body.contains("changes by target"));
    }

    #[test]
    fn test_schedule_respects_local_hour() {
        let schedule = DigestSchedule {
            hour_local: 8,
            tz: chrono_tz::America::New_York,
        };
        // 09:00 UTC is 05:00 in New York during DST
        assert!(schedule.due(None, now()).is_none());

        let later = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let date = schedule.due(None, later).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!(schedule.due(Some(date), later).is_none());
    }

    #[test]
    fn test_digest_id_follows_local_date() {
        let schedule = DigestSchedule {
            hour_local: 8,
            tz: chrono_tz::Asia::Tokyo,
        };
        // 23:00 UTC on May 2 is already 08:00 on May 3 in Tokyo
        let late = Utc.with_ymd_and_hms(2024, 5, 2, 23, 0, 0).unwrap();
        let date = schedule.due(None, late).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());

        let digest = build_daily_digest(&DigestLog::default(), date, late, 8);
        assert_eq!(digest.alert_id, "daily-digest-2024-05-03");
    }
}
