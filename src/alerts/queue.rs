//! Persistent retry queue with bounded backoff
//!
//! Alerts only enter the queue after their first delivery attempt failed.
//! Each renewed failure pushes `next_retry_at` further out along the
//! configured schedule until the retry window closes, at which point the
//! alert is dropped rather than retried forever.

use chrono::{DateTime, TimeDelta, Utc};

use super::model::{AlertPayload, PendingAlert};

/// Backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay in minutes before retry N, indexed by attempt count
    pub schedule_minutes: Vec<u32>,
    /// Delay once the schedule is exhausted
    pub tail_minutes: u32,
    /// Age after which a failing alert is abandoned
    pub max_window: TimeDelta,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            schedule_minutes: vec![1, 5, 15, 60],
            tail_minutes: 360,
            max_window: TimeDelta::hours(48),
        }
    }
}

impl RetryPolicy {
    /// Delay applied after the `attempts`-th failure
    pub fn delay_for(&self, attempts: u32) -> TimeDelta {
        let index = attempts.saturating_sub(1) as usize;
        let minutes = self
            .schedule_minutes
            .get(index)
            .copied()
            .unwrap_or(self.tail_minutes);
        TimeDelta::minutes(i64::from(minutes))
    }

    /// Next retry time, or `None` once the retry window has been exceeded
    pub fn next_retry_at(
        &self,
        now: DateTime<Utc>,
        attempts: u32,
        first_failed_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if now - first_failed_at > self.max_window {
            return None;
        }
        Some(now + self.delay_for(attempts))
    }
}

/// Result of a failed retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Requeued { attempts: u32, next_retry_at: DateTime<Utc> },
    Dropped { attempts: u32 },
}

/// Queue of alerts waiting for another delivery attempt
#[derive(Debug, Clone, Default)]
pub struct RetryQueue {
    policy: RetryPolicy,
    items: Vec<PendingAlert>,
}

impl RetryQueue {
    /// Build from persisted records, keeping the first record per alert id
    pub fn new(policy: RetryPolicy, pending: Vec<PendingAlert>) -> Self {
        let mut queue = Self {
            policy,
            items: Vec::with_capacity(pending.len()),
        };
        for item in pending {
            if queue.contains(&item.payload.alert_id) {
                tracing::warn!(alert_id = %item.payload.alert_id, "Duplicate pending alert dropped");
                continue;
            }
            queue.items.push(item);
        }
        queue
    }

    /// Queue an alert whose first delivery just failed. Returns false if it is already queued.
    pub fn enqueue(&mut self, payload: AlertPayload, now: DateTime<Utc>) -> bool {
        if self.contains(&payload.alert_id) {
            return false;
        }
        self.items.push(PendingAlert {
            payload,
            attempts: 1,
            first_failed_at: now,
            next_retry_at: now + self.policy.delay_for(1),
        });
        true
    }

    /// Remove and return the due items; the rest stay queued untouched
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<PendingAlert> {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item| item.next_retry_at <= now);
        self.items = waiting;
        due
    }

    /// Record another failed attempt for an item taken with [`take_due`](Self::take_due)
    pub fn retry(&mut self, mut item: PendingAlert, now: DateTime<Utc>) -> RetryOutcome {
        let attempts = item.attempts.saturating_add(1);
        match self.policy.next_retry_at(now, attempts, item.first_failed_at) {
            Some(next_retry_at) => {
                item.attempts = attempts;
                item.next_retry_at = next_retry_at;
                self.items.push(item);
                RetryOutcome::Requeued {
                    attempts,
                    next_retry_at,
                }
            }
            None => RetryOutcome::Dropped { attempts },
        }
    }

    pub fn contains(&self, alert_id: &str) -> bool {
        self.items.iter().any(|item| item.payload.alert_id == alert_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingAlert> {
        self.items.iter()
    }

    pub fn into_pending(self) -> Vec<PendingAlert> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertLevel;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn payload(id: &str) -> AlertPayload {
        AlertPayload::new(id, "test", AlertLevel::Warning, "title", "body", t0())
    }

    #[test]
    fn test_first_failure_waits_one_minute() {
        let mut queue = RetryQueue::default();
        assert!(queue.enqueue(payload("a1"), t0()));

        let item = queue.iter().next().unwrap();
        assert_eq!(item.attempts, 1);
        assert_eq!(item.first_failed_at, t0());
        assert_eq!(item.next_retry_at, t0() + TimeDelta::minutes(1));
    }

    #[test]
    fn test_enqueue_is_idempotent_per_id() {
        let mut queue = RetryQueue::default();
        assert!(queue.enqueue(payload("a1"), t0()));
        assert!(!queue.enqueue(payload("a1"), t0()));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_delay_grows_until_tail() {
        let policy = RetryPolicy::default();
        let delays: Vec<i64> = (1..=6).map(|a| policy.delay_for(a).num_minutes()).collect();
        assert_eq!(delays, vec![1, 5, 15, 60, 360, 360]);
        for pair in delays.windows(2).take(4) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_take_due_leaves_future_items() {
        let mut queue = RetryQueue::default();
        queue.enqueue(payload("early"), t0());
        queue.enqueue(payload("late"), t0() + TimeDelta::minutes(30));

        let now = t0() + TimeDelta::minutes(2);
        let due = queue.take_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].payload.alert_id, "early");
        assert!(queue.contains("late"));
        assert!(!queue.contains("early"));
    }

    #[test]
    fn test_retry_advances_schedule() {
        let mut queue = RetryQueue::default();
        queue.enqueue(payload("a1"), t0());

        let now = t0() + TimeDelta::minutes(1);
        let item = queue.take_due(now).remove(0);
        let outcome = queue.retry(item, now);
        assert_eq!(
            outcome,
            RetryOutcome::Requeued {
                attempts: 2,
                next_retry_at: now + TimeDelta::minutes(5),
            }
        );
        assert!(queue.contains("a1"));
    }

    #[test]
    fn test_retry_drops_after_window() {
        let mut queue = RetryQueue::default();
        queue.enqueue(payload("stuck"), t0());

        let now = t0() + TimeDelta::hours(49);
        let item = queue.take_due(now).remove(0);
        assert_eq!(queue.retry(item, now), RetryOutcome::Dropped { attempts: 2 });
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_records_collapse_on_load() {
        let mut queue = RetryQueue::default();
        queue.enqueue(payload("a1"), t0());
        let mut records = queue.clone().into_pending();
        records.extend(queue.into_pending());

        let reloaded = RetryQueue::new(RetryPolicy::default(), records);
        assert_eq!(reloaded.len(), 1);
    }
}
