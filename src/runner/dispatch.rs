//! Delivery of one run's alerts through the sender and the retry queue

use chrono::{DateTime, Utc};

use crate::alerts::{AlertPayload, AlertSender, RetryOutcome, RetryQueue};
use crate::state::{DigestLog, RunMeta};

/// Counts from one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Alerts left in the queue after failing this run
    pub queued: usize,
    /// Alerts abandoned after the retry window closed
    pub dropped: usize,
}

/// Books delivery results into the sent-id set and the digest counter
pub struct Dispatcher<'a> {
    sender: &'a dyn AlertSender,
    queue: &'a mut RetryQueue,
    meta: &'a mut RunMeta,
    digest: &'a mut DigestLog,
    report: DispatchReport,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        sender: &'a dyn AlertSender,
        queue: &'a mut RetryQueue,
        meta: &'a mut RunMeta,
        digest: &'a mut DigestLog,
    ) -> Self {
        Self {
            sender,
            queue,
            meta,
            digest,
            report: DispatchReport::default(),
        }
    }

    /// Retry due queue items first, then attempt the alerts generated this run.
    ///
    /// An id already in the sent set is never delivered again, and a fresh
    /// alert whose id is still queued is left to the queue.
    pub async fn dispatch(mut self, alerts: Vec<AlertPayload>, now: DateTime<Utc>) -> DispatchReport {
        for item in self.queue.take_due(now) {
            let alert_id = item.payload.alert_id.clone();
            if self.meta.was_sent(&alert_id) {
                tracing::debug!(alert_id = %alert_id, "Queued alert already delivered, discarding");
                continue;
            }

            if self.deliver(&item.payload).await {
                continue;
            }

            match self.queue.retry(item, now) {
                RetryOutcome::Requeued {
                    attempts,
                    next_retry_at,
                } => {
                    tracing::warn!(
                        alert_id = %alert_id,
                        attempts,
                        next_retry_at = %next_retry_at,
                        "Alert retry failed, requeued"
                    );
                    self.report.queued += 1;
                }
                RetryOutcome::Dropped { attempts } => {
                    tracing::error!(
                        alert_id = %alert_id,
                        attempts,
                        "Alert dropped after the retry window closed"
                    );
                    self.report.dropped += 1;
                }
            }
        }

        for alert in alerts {
            if self.meta.was_sent(&alert.alert_id) {
                tracing::debug!(alert_id = %alert.alert_id, "Alert already delivered, skipping");
                continue;
            }
            if self.queue.contains(&alert.alert_id) {
                tracing::debug!(alert_id = %alert.alert_id, "Alert already queued, skipping");
                continue;
            }

            if !self.deliver(&alert).await {
                tracing::warn!(alert_id = %alert.alert_id, source = %alert.source, "Alert delivery failed, queued");
                self.queue.enqueue(alert, now);
                self.report.queued += 1;
            }
        }

        self.report
    }

    async fn deliver(&mut self, alert: &AlertPayload) -> bool {
        if !self.sender.send(alert).await {
            return false;
        }
        tracing::info!(alert_id = %alert.alert_id, source = %alert.source, title = %alert.title, "Alert delivered");
        self.meta.record_sent(&alert.alert_id);
        self.digest.alerts_sent += 1;
        self.report.delivered += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertLevel, PendingAlert, RetryPolicy};
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        fail: bool,
        attempts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSender for Recorder {
        async fn send(&self, payload: &AlertPayload) -> bool {
            self.attempts.lock().push(payload.alert_id.clone());
            !self.fail
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 5, 0, 0).unwrap()
    }

    fn alert(id: &str) -> AlertPayload {
        AlertPayload::new(id, "x_status", AlertLevel::Info, "title", "body", now())
    }

    fn pending(id: &str, first_failed_at: DateTime<Utc>, next_retry_at: DateTime<Utc>) -> PendingAlert {
        PendingAlert {
            payload: alert(id),
            attempts: 1,
            first_failed_at,
            next_retry_at,
        }
    }

    #[tokio::test]
    async fn test_skips_sent_and_queued_ids() {
        let sender = Recorder::default();
        let waiting = pending("queued", now(), now() + TimeDelta::minutes(5));
        let mut queue = RetryQueue::new(RetryPolicy::default(), vec![waiting]);
        let mut meta = RunMeta::default();
        meta.record_sent("sent");
        let mut digest = DigestLog::default();

        let report = Dispatcher::new(&sender, &mut queue, &mut meta, &mut digest)
            .dispatch(vec![alert("sent"), alert("queued"), alert("new"), alert("new")], now())
            .await;

        assert_eq!(*sender.attempts.lock(), vec!["new".to_string()]);
        assert_eq!(report.delivered, 1);
        assert_eq!(digest.alerts_sent, 1);
        assert!(meta.was_sent("new"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_queued_once() {
        let sender = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut queue = RetryQueue::new(RetryPolicy::default(), Vec::new());
        let mut meta = RunMeta::default();
        let mut digest = DigestLog::default();

        let report = Dispatcher::new(&sender, &mut queue, &mut meta, &mut digest)
            .dispatch(vec![alert("a"), alert("a")], now())
            .await;

        assert_eq!(report.queued, 1);
        assert_eq!(sender.attempts.lock().len(), 1);
        let item = queue.iter().next().unwrap();
        assert_eq!(item.attempts, 1);
        assert_eq!(item.next_retry_at, now() + TimeDelta::minutes(1));
    }

    #[tokio::test]
    async fn test_due_items_retry_or_drop() {
        let sender = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let fresh = pending("fresh", now() - TimeDelta::minutes(2), now() - TimeDelta::minutes(1));
        let stale = pending("stale", now() - TimeDelta::hours(49), now() - TimeDelta::minutes(1));
        let later = pending("later", now(), now() + TimeDelta::minutes(1));
        let mut queue = RetryQueue::new(RetryPolicy::default(), vec![fresh, stale, later]);
        let mut meta = RunMeta::default();
        let mut digest = DigestLog::default();

        let report = Dispatcher::new(&sender, &mut queue, &mut meta, &mut digest)
            .dispatch(Vec::new(), now())
            .await;

        assert_eq!(report.queued, 1);
        assert_eq!(report.dropped, 1);
        assert!(queue.contains("fresh"));
        assert!(queue.contains("later"));
        assert!(!queue.contains("stale"));
        let retried = queue.iter().find(|item| item.payload.alert_id == "fresh").unwrap();
        assert_eq!(retried.attempts, 2);
        assert_eq!(retried.next_retry_at, now() + TimeDelta::minutes(5));
    }

    #[tokio::test]
    async fn test_due_item_already_sent_is_discarded() {
        let sender = Recorder::default();
        let item = pending("done", now() - TimeDelta::minutes(2), now() - TimeDelta::minutes(1));
        let mut queue = RetryQueue::new(RetryPolicy::default(), vec![item]);
        let mut meta = RunMeta::default();
        meta.record_sent("done");
        let mut digest = DigestLog::default();

        let report = Dispatcher::new(&sender, &mut queue, &mut meta, &mut digest)
            .dispatch(Vec::new(), now())
            .await;

        assert!(sender.attempts.lock().is_empty());
        assert_eq!(report, DispatchReport::default());
        assert!(queue.is_empty());
    }
}
