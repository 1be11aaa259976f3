//! Persisted process state
//!
//! The state document is loaded leniently: every field is decoded on its own
//! and falls back to its default when missing or malformed, so a damaged file
//! never aborts a run.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::bounded::BoundedLog;
use crate::alerts::gate::PrimaryStatus;
use crate::alerts::{AlertLevel, ChangeEvent};

/// Schema version written to the state document
pub const STATE_VERSION: u32 = 1;
/// Maximum entries kept in the rolling change log
pub const CHANGE_LOG_CAP: usize = 5000;
/// Maximum entries kept in the failed-check log
pub const FAILED_CHECK_CAP: usize = 1000;
/// Maximum alert ids remembered as delivered
pub const SENT_ID_CAP: usize = 2000;

/// Keys of a target record written only by the runner
pub const ORCHESTRATOR_KEYS: &[&str] = &[
    "last_checked",
    "consecutive_failures",
    "last_error",
    "unreachable_alerted",
    "primary_state",
    "primary_silent_since",
    "backup_alert_active",
    "pending_incident_since",
    "incident_alerted",
];

fn lenient<T: DeserializeOwned + Default>(obj: &Map<String, Value>, key: &str) -> T {
    obj.get(key)
        .and_then(|v| T::deserialize(v).ok())
        .unwrap_or_default()
}

fn lenient_log<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str, cap: usize) -> BoundedLog<T> {
    let items = match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| T::deserialize(item).ok())
            .collect(),
        _ => Vec::new(),
    };
    BoundedLog::from_vec(items, cap)
}

/// Per-target record: typed runner-owned fields plus opaque checker-owned keys
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TargetState {
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub unreachable_alerted: bool,
    pub primary_state: Option<PrimaryStatus>,
    pub primary_silent_since: Option<DateTime<Utc>>,
    pub backup_alert_active: bool,
    pub pending_incident_since: Option<DateTime<Utc>>,
    pub incident_alerted: bool,
    /// Fields owned by the target's checker (cursors, fingerprints)
    #[serde(flatten)]
    pub checker: Map<String, Value>,
}

impl TargetState {
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let checker = obj
            .iter()
            .filter(|(key, _)| !ORCHESTRATOR_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            last_checked: lenient(obj, "last_checked"),
            consecutive_failures: lenient(obj, "consecutive_failures"),
            last_error: lenient(obj, "last_error"),
            unreachable_alerted: lenient(obj, "unreachable_alerted"),
            primary_state: lenient(obj, "primary_state"),
            primary_silent_since: lenient(obj, "primary_silent_since"),
            backup_alert_active: lenient(obj, "backup_alert_active"),
            pending_incident_since: lenient(obj, "pending_incident_since"),
            incident_alerted: lenient(obj, "incident_alerted"),
            checker,
        }
    }

    /// Shallow-merge a checker patch; keys owned by the runner are refused and returned
    pub fn apply_patch(&mut self, patch: Map<String, Value>) -> Vec<String> {
        let mut refused = Vec::new();
        for (key, value) in patch {
            if ORCHESTRATOR_KEYS.contains(&key.as_str()) {
                refused.push(key);
            } else {
                self.checker.insert(key, value);
            }
        }
        refused
    }

    pub fn checker_str(&self, key: &str) -> Option<&str> {
        self.checker.get(key).and_then(Value::as_str)
    }

    /// Record a successful check, returning the failure count before the reset
    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) -> u32 {
        let previous = self.consecutive_failures;
        self.last_checked = Some(now);
        self.consecutive_failures = 0;
        self.last_error = None;
        self.unreachable_alerted = false;
        previous
    }

    /// Record a failed check, returning the new failure count
    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) -> u32 {
        self.last_checked = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.consecutive_failures
    }
}

/// One entry of the rolling change log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub severity: AlertLevel,
    #[serde(default)]
    pub kind: String,
}

impl From<&ChangeEvent> for ChangeRecord {
    fn from(event: &ChangeEvent) -> Self {
        Self {
            occurred_at: event.occurred_at,
            target: event.target.clone(),
            summary: event.summary.clone(),
            severity: event.severity,
            kind: event.kind.clone(),
        }
    }
}

/// One entry of the failed-check log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCheck {
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub transient: bool,
}

/// Rolling logs feeding the daily digest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestLog {
    pub changes: BoundedLog<ChangeRecord>,
    pub alerts_sent: u64,
    pub failed_checks: BoundedLog<FailedCheck>,
    pub last_sent_date: Option<NaiveDate>,
}

impl Default for DigestLog {
    fn default() -> Self {
        Self {
            changes: BoundedLog::new(CHANGE_LOG_CAP),
            alerts_sent: 0,
            failed_checks: BoundedLog::new(FAILED_CHECK_CAP),
            last_sent_date: None,
        }
    }
}

impl DigestLog {
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            changes: lenient_log(obj, "changes", CHANGE_LOG_CAP),
            alerts_sent: lenient(obj, "alerts_sent"),
            failed_checks: lenient_log(obj, "failed_checks", FAILED_CHECK_CAP),
            last_sent_date: lenient(obj, "last_sent_date"),
        }
    }

    pub fn record_change(&mut self, event: &ChangeEvent) {
        self.changes.push(ChangeRecord::from(event));
    }

    pub fn record_failed_check(&mut self, target: &str, error: &str, transient: bool, now: DateTime<Utc>) {
        self.failed_checks.push(FailedCheck {
            occurred_at: now,
            target: target.to_string(),
            error: error.to_string(),
            transient,
        });
    }
}

/// Run bookkeeping carried between invocations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMeta {
    pub last_successful_run: Option<DateTime<Utc>>,
    pub watchdog_alerted: bool,
    pub sent_alert_ids: BoundedLog<String>,
    pub deployed_version: Option<String>,
}

impl Default for RunMeta {
    fn default() -> Self {
        Self {
            last_successful_run: None,
            watchdog_alerted: false,
            sent_alert_ids: BoundedLog::new(SENT_ID_CAP),
            deployed_version: None,
        }
    }
}

impl RunMeta {
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            last_successful_run: lenient(obj, "last_successful_run"),
            watchdog_alerted: lenient(obj, "watchdog_alerted"),
            sent_alert_ids: lenient_log(obj, "sent_alert_ids", SENT_ID_CAP),
            deployed_version: lenient(obj, "deployed_version"),
        }
    }

    pub fn was_sent(&self, alert_id: &str) -> bool {
        self.sent_alert_ids.iter().any(|id| id == alert_id)
    }

    pub fn record_sent(&mut self, alert_id: &str) {
        if !self.was_sent(alert_id) {
            self.sent_alert_ids.push(alert_id.to_string());
        }
    }
}

/// Root state document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedState {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetState>,
    pub digest: DigestLog,
    pub meta: RunMeta,
}

impl PersistedState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_VERSION,
            last_updated: now,
            targets: BTreeMap::new(),
            digest: DigestLog::default(),
            meta: RunMeta::default(),
        }
    }

    /// Decode a state document, substituting defaults field by field
    pub fn from_value(value: &Value, now: DateTime<Utc>) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::new(now);
        };

        let targets = match obj.get("targets") {
            Some(Value::Object(targets)) => targets
                .iter()
                .map(|(id, record)| (id.clone(), TargetState::from_value(record)))
                .collect(),
            _ => BTreeMap::new(),
        };

        Self {
            version: obj
                .get("version")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(STATE_VERSION),
            last_updated: obj
                .get("last_updated")
                .and_then(|v| DateTime::<Utc>::deserialize(v).ok())
                .unwrap_or(now),
            targets,
            digest: obj.get("digest").map(DigestLog::from_value).unwrap_or_default(),
            meta: obj.get("meta").map(RunMeta::from_value).unwrap_or_default(),
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// No target has ever been recorded
    pub fn is_first_run(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target_mut(&mut self, id: &str) -> &mut TargetState {
        self.targets.entry(id.to_string()).or_default()
    }
}
