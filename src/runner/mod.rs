//! Run orchestration
//!
//! One [`Runner::run`] call is one scheduled invocation: load state, check
//! the targets that are due, gate and compose alerts, deliver them through
//! the retry queue, and write both documents back. State is only persisted at
//! the very end, so a run killed halfway leaves the previous state intact.

pub mod dispatch;
pub mod schedule;
pub mod targets;

pub use dispatch::{DispatchReport, Dispatcher};
pub use schedule::should_run;
pub use targets::{default_targets, Target, TargetKind};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;

use crate::alerts::compose::{
    bootstrap_alert, group_feed_alert, group_target_alert, normalize_version, release_alert,
};
use crate::alerts::{
    build_daily_digest, evaluate_watchdog, AlertPayload, AlertSender, ChangeEvent, DigestSchedule,
    GateConfig, GateTarget, IncidentGate, PrimaryStatus, RetryPolicy, RetryQueue, StatusObservation,
};
use crate::checks::{CheckContext, CheckError, CheckOutcome, PrimaryMonitor};
use crate::state::{PersistedState, StateError, StateStore, TargetState};

/// Failed-check label used when the primary monitor cannot be read
pub const PRIMARY_MONITOR_TARGET: &str = "primary_monitor";

/// Knobs the runner needs, derived from the settings
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub gate: GateConfig,
    pub retry: RetryPolicy,
    pub digest: DigestSchedule,
    pub watchdog_max_silence: TimeDelta,
    pub max_links_per_alert: usize,
    /// Build version, compared against the deployed version on record
    pub version: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            retry: RetryPolicy::default(),
            digest: DigestSchedule::default(),
            watchdog_max_silence: TimeDelta::minutes(60),
            max_links_per_alert: 20,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub first_run: bool,
    /// Targets whose checker ran
    pub checked: usize,
    /// Of those, how many failed
    pub failed: usize,
    /// Alerts produced this run, before dedup against sent and queued ids
    pub generated: usize,
    pub delivered: usize,
    pub queued: usize,
    pub dropped: usize,
}

/// Single-invocation orchestrator
pub struct Runner {
    config: RunnerConfig,
    gate: IncidentGate,
    store: Arc<dyn StateStore>,
    sender: Arc<dyn AlertSender>,
    primary: Option<Arc<dyn PrimaryMonitor>>,
    targets: Vec<Target>,
}

/// Alerts and grouped events collected while merging check results
#[derive(Default)]
struct Collected {
    alerts: Vec<AlertPayload>,
    feed_events: Vec<ChangeEvent>,
}

impl Runner {
    pub fn new(
        config: RunnerConfig,
        store: Arc<dyn StateStore>,
        sender: Arc<dyn AlertSender>,
        targets: Vec<Target>,
    ) -> Self {
        Self {
            gate: IncidentGate::new(config.gate.clone()),
            config,
            store,
            sender,
            primary: None,
            targets,
        }
    }

    /// Corroborate status pages against an external uptime monitor
    pub fn with_primary_monitor(mut self, monitor: Arc<dyn PrimaryMonitor>) -> Self {
        self.primary = Some(monitor);
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Execute one run at `now`.
    ///
    /// Checker and delivery failures are contained and recorded; only a
    /// failure to load or save the state documents is returned as an error.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        let mut state = self.store.load_state()?;
        let first_run = state.is_first_run();
        tracing::info!(first_run, targets = self.targets.len(), "Run started");

        let watchdog = evaluate_watchdog(&mut state.meta, now, self.config.watchdog_max_silence);
        let mut queue = RetryQueue::new(self.config.retry.clone(), self.store.load_pending()?);

        let mut collected = Collected::default();
        let previous_version = normalize_version(state.meta.deployed_version.as_deref());
        collected
            .alerts
            .extend(release_alert(previous_version.as_deref(), &self.config.version, now, first_run));
        state.meta.deployed_version = Some(self.config.version.clone());

        for target in &self.targets {
            state.target_mut(&target.id);
        }

        let due: Vec<&Target> = self
            .targets
            .iter()
            .filter(|target| {
                let last_checked = state.targets.get(&target.id).and_then(|record| record.last_checked);
                let due = should_run(last_checked, target.interval, now);
                if !due {
                    tracing::debug!(target_id = %target.id, "Target not due, skipping");
                }
                due
            })
            .collect();

        let primary_statuses = self.primary_statuses(&due, &mut state, now).await;

        // Checkers see snapshots; results are merged one target at a time below
        let snapshots: Vec<TargetState> = due
            .iter()
            .map(|target| state.targets.get(&target.id).cloned().unwrap_or_default())
            .collect();
        let results = join_all(due.iter().zip(&snapshots).map(|(target, prior)| async move {
            let ctx = CheckContext {
                target: &target.id,
                prior,
                now,
            };
            target.checker.check(&ctx).await
        }))
        .await;

        let mut report = RunReport {
            first_run,
            ..RunReport::default()
        };
        for (target, result) in due.iter().zip(results) {
            report.checked += 1;
            match result {
                Ok(outcome) => self.merge_success(target, outcome, &primary_statuses, &mut state, &mut collected, now),
                Err(err) => {
                    report.failed += 1;
                    self.merge_failure(target, &err, &mut state, &mut collected, now);
                }
            }
        }

        let Collected {
            mut alerts,
            feed_events,
        } = collected;
        alerts.extend(group_feed_alert(&feed_events, now, self.config.max_links_per_alert));

        if let Some(date) = self.config.digest.due(state.digest.last_sent_date, now) {
            alerts.push(build_daily_digest(&state.digest, date, now, self.targets.len()));
            state.digest.last_sent_date = Some(date);
            state.digest.alerts_sent = 0;
        }

        let outgoing: Vec<AlertPayload> = if first_run {
            if !alerts.is_empty() {
                tracing::info!(suppressed = alerts.len(), "First run, replacing generated alerts with the bootstrap alert");
            }
            vec![bootstrap_alert(self.targets.len(), &self.config.version, now)]
        } else {
            watchdog.into_iter().chain(alerts).collect()
        };
        report.generated = outgoing.len();

        let delivery = Dispatcher::new(self.sender.as_ref(), &mut queue, &mut state.meta, &mut state.digest)
            .dispatch(outgoing, now)
            .await;
        report.delivered = delivery.delivered;
        report.queued = delivery.queued;
        report.dropped = delivery.dropped;

        state.meta.last_successful_run = Some(now);
        self.store.save_state(&mut state)?;
        self.store.save_pending(&queue.into_pending())?;

        tracing::info!(
            checked = report.checked,
            failed = report.failed,
            generated = report.generated,
            delivered = report.delivered,
            queued = report.queued,
            dropped = report.dropped,
            "Run finished"
        );
        Ok(report)
    }

    /// Read the primary monitor once, and only if a gated status target is due
    async fn primary_statuses(
        &self,
        due: &[&Target],
        state: &mut PersistedState,
        now: DateTime<Utc>,
    ) -> HashMap<String, PrimaryStatus> {
        let Some(monitor) = &self.primary else {
            return HashMap::new();
        };
        let needed = due.iter().any(|target| {
            matches!(
                target.kind,
                TargetKind::StatusPage {
                    primary_monitor_id: Some(_)
                }
            )
        });
        if !needed {
            return HashMap::new();
        }

        match monitor.statuses().await {
            Ok(statuses) => {
                tracing::debug!(monitors = statuses.len(), "Primary monitor statuses fetched");
                statuses
            }
            Err(err) => {
                tracing::warn!(error = %err, "Primary monitor unavailable, every status counts as unknown");
                state
                    .digest
                    .record_failed_check(PRIMARY_MONITOR_TARGET, &err.to_string(), err.is_transient(), now);
                HashMap::new()
            }
        }
    }

    fn merge_success(
        &self,
        target: &Target,
        outcome: CheckOutcome,
        primary_statuses: &HashMap<String, PrimaryStatus>,
        state: &mut PersistedState,
        collected: &mut Collected,
        now: DateTime<Utc>,
    ) {
        let CheckOutcome {
            mut events,
            state_patch,
            observation,
        } = outcome;
        let gate_target = GateTarget {
            id: &target.id,
            link: target.primary_link(),
        };

        let record = state.target_mut(&target.id);
        let previous = StatusObservation::from_state(record);
        let previous_failures = record.mark_succeeded(now);
        for key in record.apply_patch(state_patch) {
            tracing::warn!(target_id = %target.id, key = %key, "Checker patch touched a runner-owned key, ignored");
        }

        match &target.kind {
            TargetKind::StatusPage { primary_monitor_id } => {
                collected
                    .alerts
                    .extend(self.gate.reachable_again_alert(gate_target, previous_failures, now));
                if let Some(current) = observation {
                    let phase_events = self.gate.observe_phase(gate_target, record, previous.as_ref(), &current, now);
                    events.extend(phase_events);
                    let primary = primary_monitor_id
                        .as_ref()
                        .and_then(|id| primary_statuses.get(id))
                        .copied()
                        .unwrap_or_default();
                    collected
                        .alerts
                        .extend(self.gate.gate_backup(gate_target, record, current.phase, primary, &events, now));
                }
            }
            TargetKind::AccountFeed => collected.feed_events.extend(events.iter().cloned()),
            TargetKind::Docs => {
                if !events.is_empty() {
                    collected.alerts.push(group_target_alert(
                        &target.id,
                        &events,
                        now,
                        self.config.max_links_per_alert,
                    ));
                }
            }
        }

        tracing::debug!(target_id = %target.id, events = events.len(), "Check succeeded");
        for event in &events {
            state.digest.record_change(event);
        }
    }

    fn merge_failure(
        &self,
        target: &Target,
        err: &CheckError,
        state: &mut PersistedState,
        collected: &mut Collected,
        now: DateTime<Utc>,
    ) {
        let message = err.to_string();
        if err.is_transient() {
            tracing::warn!(target_id = %target.id, error = %message, "Check failed");
        } else {
            tracing::error!(target_id = %target.id, error = %message, "Check failed permanently");
        }

        let record = state.target_mut(&target.id);
        let failures = record.mark_failed(&message, now);
        if matches!(target.kind, TargetKind::StatusPage { .. }) {
            let gate_target = GateTarget {
                id: &target.id,
                link: target.primary_link(),
            };
            collected
                .alerts
                .extend(self.gate.unreachable_alert(gate_target, record, &message, now));
        }
        tracing::debug!(target_id = %target.id, failures, "Failure recorded");

        state
            .digest
            .record_failed_check(&target.id, &message, err.is_transient(), now);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("State store error: {0}")]
    State(#[from] StateError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertLevel, PendingAlert, Phase};
    use crate::checks::Checker;
    use crate::state::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// 06:00 in Lisbon, before the digest hour
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 5, 0, 0).unwrap()
    }

    enum Step {
        Quiet,
        Changes(&'static [&'static str]),
        Phase(Phase),
        Fail(CheckError),
    }

    /// Plays back one step per call, then stays quiet
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Checker for Scripted {
        async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().pop_front().unwrap_or(Step::Quiet);
            match step {
                Step::Quiet => Ok(CheckOutcome::default()),
                Step::Changes(summaries) => Ok(CheckOutcome::new(
                    summaries
                        .iter()
                        .map(|summary| ChangeEvent::new(ctx.target, "changelog_entry", *summary, ctx.now))
                        .collect(),
                )),
                Step::Phase(phase) => {
                    let observation = StatusObservation {
                        phase,
                        content_hash: format!("sha256:{}", phase.as_str()),
                    };
                    Ok(CheckOutcome::default()
                        .with_patch("phase", phase.as_str())
                        .with_patch("content_hash", observation.content_hash.clone())
                        .with_observation(observation))
                }
                Step::Fail(err) => Err(err),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        failing: AtomicBool,
        attempts: AtomicUsize,
        delivered: Mutex<Vec<AlertPayload>>,
    }

    impl Recorder {
        fn failing() -> Arc<Self> {
            let recorder = Self::default();
            recorder.failing.store(true, Ordering::SeqCst);
            Arc::new(recorder)
        }

        fn delivered(&self) -> Vec<AlertPayload> {
            self.delivered.lock().clone()
        }

        fn titles(&self) -> Vec<String> {
            self.delivered.lock().iter().map(|a| a.title.clone()).collect()
        }
    }

    #[async_trait]
    impl AlertSender for Recorder {
        async fn send(&self, payload: &AlertPayload) -> bool {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return false;
            }
            self.delivered.lock().push(payload.clone());
            true
        }
    }

    struct FixedMonitor {
        statuses: Result<HashMap<String, PrimaryStatus>, CheckError>,
        calls: AtomicUsize,
    }

    impl FixedMonitor {
        fn reporting(id: &str, status: PrimaryStatus) -> Arc<Self> {
            Arc::new(Self {
                statuses: Ok(HashMap::from([(id.to_string(), status)])),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PrimaryMonitor for FixedMonitor {
        async fn statuses(&self) -> Result<HashMap<String, PrimaryStatus>, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.statuses.clone()
        }
    }

    fn config() -> RunnerConfig {
        RunnerConfig {
            version: "1.0.0".to_string(),
            ..RunnerConfig::default()
        }
    }

    fn docs(id: &str, checker: Arc<Scripted>) -> Target {
        Target::new(id, TargetKind::Docs, TimeDelta::zero(), checker)
    }

    fn status(id: &str, monitor: Option<&str>, checker: Arc<Scripted>) -> Target {
        Target::new(
            id,
            TargetKind::StatusPage {
                primary_monitor_id: monitor.map(str::to_string),
            },
            TimeDelta::zero(),
            checker,
        )
        .with_links(vec![format!("https://{}.example.com", id)])
    }

    /// A store that has seen a run before, so alerts are not suppressed
    fn seeded_store(targets: &[&str]) -> Arc<MemoryStore> {
        let records: serde_json::Map<String, Value> =
            targets.iter().map(|id| (id.to_string(), json!({}))).collect();
        let document = json!({
            "version": 1,
            "targets": records,
            "meta": {"deployed_version": "1.0.0", "last_successful_run": t0().to_rfc3339()},
        });
        Arc::new(MemoryStore::with_documents(Some(document), None))
    }

    fn runner(store: &Arc<MemoryStore>, sender: &Arc<Recorder>, targets: Vec<Target>) -> Runner {
        Runner::new(config(), store.clone(), sender.clone(), targets)
    }

    fn saved_state(store: &MemoryStore) -> PersistedState {
        PersistedState::from_value(&store.state_document().unwrap(), t0())
    }

    fn saved_pending(store: &MemoryStore) -> Vec<PendingAlert> {
        serde_json::from_value(store.pending_document().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_first_run_sends_only_bootstrap() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(Recorder::default());
        let changelog = Scripted::new(vec![Step::Changes(&["v2 released"])]);
        let runner = runner(
            &store,
            &sender,
            vec![docs("x_changelog", changelog.clone()), status("x_status", None, Scripted::new(vec![]))],
        );

        let report = runner.run(t0()).await.unwrap();

        assert!(report.first_run);
        assert_eq!(report.checked, 2);
        assert_eq!(report.generated, 1);
        assert_eq!(changelog.calls(), 1);
        let delivered = sender.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].has_tag("bootstrap"));
        assert_eq!(delivered[0].body, "Monitoring initialized for 2 targets. Version: v1.0.0.");

        let state = saved_state(&store);
        assert_eq!(state.targets.len(), 2);
        assert_eq!(state.targets["x_changelog"].last_checked, Some(t0()));
        assert_eq!(state.meta.last_successful_run, Some(t0()));
        assert_eq!(state.meta.deployed_version.as_deref(), Some("1.0.0"));
        assert_eq!(state.digest.changes.len(), 1);
        assert!(saved_pending(&store).is_empty());
    }

    #[tokio::test]
    async fn test_regenerated_alert_is_not_delivered_twice() {
        let store = seeded_store(&["x_changelog"]);
        let sender = Arc::new(Recorder::default());
        let changelog = Scripted::new(vec![Step::Changes(&["v2 released"]), Step::Changes(&["v2 released"])]);
        let runner = runner(&store, &sender, vec![docs("x_changelog", changelog)]);

        runner.run(t0()).await.unwrap();
        // Same minute, same summary: same alert id
        let report = runner.run(t0() + TimeDelta::seconds(20)).await.unwrap();

        assert_eq!(report.generated, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(sender.titles(), vec!["📝 x_changelog updates".to_string()]);
        let state = saved_state(&store);
        assert_eq!(state.digest.alerts_sent, 1);
        assert_eq!(state.digest.changes.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_queued_and_retried() {
        let store = Arc::new(MemoryStore::new());
        let sender = Recorder::failing();
        let runner = runner(&store, &sender, vec![docs("x_changelog", Scripted::new(vec![]))]);

        let report = runner.run(t0()).await.unwrap();
        assert_eq!(report.queued, 1);
        let pending = saved_pending(&store);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].first_failed_at, t0());
        assert_eq!(pending[0].next_retry_at, t0() + TimeDelta::minutes(1));

        // Not yet due
        runner.run(t0() + TimeDelta::seconds(30)).await.unwrap();
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 1);

        // Due, fails again: second delay of the schedule
        runner.run(t0() + TimeDelta::minutes(2)).await.unwrap();
        let pending = saved_pending(&store);
        assert_eq!(pending[0].attempts, 2);
        assert_eq!(pending[0].next_retry_at, t0() + TimeDelta::minutes(7));

        sender.failing.store(false, Ordering::SeqCst);
        let report = runner.run(t0() + TimeDelta::minutes(8)).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(sender.delivered()[0].has_tag("bootstrap"));
        assert!(saved_pending(&store).is_empty());
        let state = saved_state(&store);
        assert!(state.meta.was_sent(&sender.delivered()[0].alert_id));
    }

    #[tokio::test]
    async fn test_expired_alert_is_dropped() {
        let now = t0();
        let stale = PendingAlert {
            payload: AlertPayload::new("stale", "x_status", AlertLevel::Warning, "t", "b", now),
            attempts: 6,
            first_failed_at: now - TimeDelta::hours(49),
            next_retry_at: now - TimeDelta::minutes(1),
        };
        let state = seeded_store(&["x_changelog"]).state_document();
        let store = Arc::new(MemoryStore::with_documents(
            state,
            Some(serde_json::to_value(vec![stale]).unwrap()),
        ));
        let sender = Recorder::failing();
        let runner = runner(&store, &sender, vec![docs("x_changelog", Scripted::new(vec![]))]);

        let report = runner.run(now).await.unwrap();

        assert_eq!(report.dropped, 1);
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 1);
        assert!(saved_pending(&store).is_empty());
    }

    #[tokio::test]
    async fn test_checker_failure_is_isolated() {
        let store = seeded_store(&["x_changelog", "twitterapi_changelog"]);
        let sender = Arc::new(Recorder::default());
        let broken = Scripted::new(vec![Step::Fail(CheckError::Transient("timed out".into()))]);
        let healthy = Scripted::new(vec![Step::Changes(&["new endpoint"])]);
        let runner = runner(
            &store,
            &sender,
            vec![docs("x_changelog", broken), docs("twitterapi_changelog", healthy)],
        );

        let report = runner.run(t0()).await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(sender.titles(), vec!["📝 twitterapi_changelog updates".to_string()]);

        let state = saved_state(&store);
        let failed = &state.targets["x_changelog"];
        assert_eq!(failed.consecutive_failures, 1);
        assert_eq!(failed.last_error.as_deref(), Some("timed out"));
        assert_eq!(failed.last_checked, Some(t0()));
        let entries: Vec<_> = state.digest.failed_checks.iter().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, "x_changelog");
        assert!(entries[0].transient);
        assert_eq!(state.meta.last_successful_run, Some(t0()));
    }

    #[tokio::test]
    async fn test_unreachable_then_reachable_again() {
        let store = seeded_store(&["x_status"]);
        let sender = Arc::new(Recorder::default());
        let fail = || Step::Fail(CheckError::Transient("connection refused".into()));
        let checker = Scripted::new(vec![fail(), fail(), fail(), fail(), Step::Phase(Phase::Operational)]);
        let runner = runner(&store, &sender, vec![status("x_status", None, checker)]);

        for minute in 0..5 {
            runner.run(t0() + TimeDelta::minutes(minute)).await.unwrap();
        }

        assert_eq!(
            sender.titles(),
            vec!["⚠️ x_status unreachable".to_string(), "🟢 x_status reachable again".to_string()]
        );
        let unreachable = &sender.delivered()[0];
        assert!(unreachable.body.contains("3 consecutive checks"));
        assert_eq!(unreachable.links, vec!["https://x_status.example.com".to_string()]);
        assert!(sender.delivered()[1].body.contains("after 4 failed checks"));

        let record = &saved_state(&store).targets["x_status"];
        assert_eq!(record.consecutive_failures, 0);
        assert!(!record.unreachable_alerted);
    }

    #[tokio::test]
    async fn test_backup_gate_waits_for_primary_silence() {
        let store = seeded_store(&["x_status"]);
        let sender = Arc::new(Recorder::default());
        let checker = Scripted::new(vec![
            Step::Phase(Phase::MajorOutage),
            Step::Phase(Phase::MajorOutage),
            Step::Phase(Phase::Operational),
        ]);
        let monitor = FixedMonitor::reporting("m1", PrimaryStatus::Up);
        let runner = runner(&store, &sender, vec![status("x_status", Some("m1"), checker)])
            .with_primary_monitor(monitor.clone());

        runner.run(t0()).await.unwrap();
        assert!(sender.delivered().is_empty());
        let record = &saved_state(&store).targets["x_status"];
        assert!(record.incident_alerted);
        assert_eq!(record.primary_silent_since, Some(t0()));
        assert_eq!(record.primary_state, Some(PrimaryStatus::Up));

        runner.run(t0() + TimeDelta::minutes(10)).await.unwrap();
        runner.run(t0() + TimeDelta::minutes(15)).await.unwrap();

        let delivered = sender.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].title, "⚠️ x_status backup incident");
        assert_eq!(delivered[0].level, AlertLevel::Critical);
        assert!(delivered[0].has_tag("primary_silent"));
        assert_eq!(delivered[1].title, "🟢 x_status backup incident resolved");
        assert_eq!(monitor.calls.load(Ordering::SeqCst), 3);

        let state = saved_state(&store);
        let kinds: Vec<_> = state.digest.changes.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, vec!["incident_started", "incident_resolved"]);
        assert!(!state.targets["x_status"].backup_alert_active);
    }

    #[tokio::test]
    async fn test_primary_down_owns_the_outage() {
        let store = seeded_store(&["x_status"]);
        let sender = Arc::new(Recorder::default());
        let checker = Scripted::new(vec![Step::Phase(Phase::MajorOutage), Step::Phase(Phase::MajorOutage)]);
        let runner = runner(&store, &sender, vec![status("x_status", Some("m1"), checker)])
            .with_primary_monitor(FixedMonitor::reporting("m1", PrimaryStatus::Down));

        runner.run(t0()).await.unwrap();
        runner.run(t0() + TimeDelta::minutes(30)).await.unwrap();

        assert!(sender.delivered().is_empty());
        let record = &saved_state(&store).targets["x_status"];
        assert_eq!(record.primary_silent_since, None);
        assert!(!record.backup_alert_active);
    }

    #[tokio::test]
    async fn test_primary_monitor_failure_is_recorded() {
        let store = seeded_store(&["x_status"]);
        let sender = Arc::new(Recorder::default());
        let monitor = Arc::new(FixedMonitor {
            statuses: Err(CheckError::Permanent("HTTP 401".into())),
            calls: AtomicUsize::new(0),
        });
        let checker = Scripted::new(vec![Step::Phase(Phase::Operational)]);
        let runner = runner(&store, &sender, vec![status("x_status", Some("m1"), checker)])
            .with_primary_monitor(monitor);

        let report = runner.run(t0()).await.unwrap();

        assert_eq!(report.failed, 0);
        let state = saved_state(&store);
        let entries: Vec<_> = state.digest.failed_checks.iter().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, PRIMARY_MONITOR_TARGET);
        assert_eq!(state.targets["x_status"].primary_state, Some(PrimaryStatus::Unknown));
    }

    #[tokio::test]
    async fn test_targets_wait_for_their_interval() {
        let store = seeded_store(&["x_changelog"]);
        let sender = Arc::new(Recorder::default());
        let checker = Scripted::new(vec![]);
        let target = Target::new("x_changelog", TargetKind::Docs, TimeDelta::minutes(30), checker.clone());
        let runner = runner(&store, &sender, vec![target]);

        runner.run(t0()).await.unwrap();
        let report = runner.run(t0() + TimeDelta::minutes(10)).await.unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(checker.calls(), 1);

        runner.run(t0() + TimeDelta::minutes(30)).await.unwrap();
        assert_eq!(checker.calls(), 2);
    }

    #[tokio::test]
    async fn test_feed_events_are_grouped() {
        let store = seeded_store(&["api_tweets", "xdevelopers_tweets"]);
        let sender = Arc::new(Recorder::default());
        fn feed(summaries: &'static [&'static str]) -> Arc<Scripted> {
            Scripted::new(vec![Step::Changes(summaries)])
        }
        let runner = runner(
            &store,
            &sender,
            vec![
                Target::new("api_tweets", TargetKind::AccountFeed, TimeDelta::zero(), feed(&["one"])),
                Target::new("xdevelopers_tweets", TargetKind::AccountFeed, TimeDelta::zero(), feed(&["two", "three"])),
            ],
        );

        runner.run(t0()).await.unwrap();

        let delivered = sender.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].source, "tweets");
        assert!(delivered[0].body.starts_with("Detected 3 new tweets"));
    }

    #[tokio::test]
    async fn test_release_digest_and_watchdog() {
        let store = seeded_store(&["x_changelog"]);
        let mut document = store.state_document().unwrap();
        document["meta"]["deployed_version"] = json!("0.9.0");
        // Two hours of silence, and 10:00 in Lisbon
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        document["meta"]["last_successful_run"] = json!((now - TimeDelta::hours(2)).to_rfc3339());
        let store = Arc::new(MemoryStore::with_documents(Some(document), None));
        let sender = Arc::new(Recorder::default());
        let runner = runner(&store, &sender, vec![docs("x_changelog", Scripted::new(vec![]))]);

        runner.run(now).await.unwrap();

        assert_eq!(
            sender.titles(),
            vec![
                "⚠️ Monitor watchdog".to_string(),
                "🚀 watchpost updated to v1.0.0".to_string(),
                "🧾 Daily digest".to_string(),
            ]
        );
        assert!(sender.delivered()[2].body.contains("All quiet"));

        let state = saved_state(&store);
        assert!(state.meta.watchdog_alerted);
        assert_eq!(state.meta.deployed_version.as_deref(), Some("1.0.0"));
        assert!(state.digest.last_sent_date.is_some());

        // Next run: watchdog recovers, digest already sent today
        runner.run(now + TimeDelta::minutes(5)).await.unwrap();
        assert_eq!(sender.titles().len(), 4);
        assert_eq!(sender.titles()[3], "🟢 Monitor watchdog recovered");
    }

    #[tokio::test]
    async fn test_digest_once_per_local_day_ahead_of_utc() {
        let store = seeded_store(&["x_changelog"]);
        let sender = Arc::new(Recorder::default());
        let config = RunnerConfig {
            digest: DigestSchedule {
                hour_local: 8,
                tz: chrono_tz::Asia::Tokyo,
            },
            watchdog_max_silence: TimeDelta::days(7),
            ..config()
        };
        let runner = Runner::new(config, store.clone(), sender.clone(), vec![docs("x_changelog", Scripted::new(vec![]))]);

        // 10:00 on May 2 in Tokyo, a late send for that day
        runner.run(Utc.with_ymd_and_hms(2024, 5, 2, 1, 0, 0).unwrap()).await.unwrap();
        // 08:00 on May 3 in Tokyo, still May 2 in UTC
        runner.run(Utc.with_ymd_and_hms(2024, 5, 2, 23, 0, 0).unwrap()).await.unwrap();

        let digests: Vec<_> = sender
            .delivered()
            .into_iter()
            .filter(|alert| alert.source == "daily_digest")
            .map(|alert| alert.alert_id)
            .collect();
        assert_eq!(digests, vec!["daily-digest-2024-05-02", "daily-digest-2024-05-03"]);
        assert_eq!(
            saved_state(&store).digest.last_sent_date,
            chrono::NaiveDate::from_ymd_opt(2024, 5, 3)
        );
    }
}
