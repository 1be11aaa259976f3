//! Incident gating for status-page targets
//!
//! Two independent signals feed the gate: the phase scraped from the status
//! page (the backup signal) and the up/down state reported by an external
//! uptime monitor (the primary signal). Every alert the gate emits is
//! edge-triggered on a boolean in [`TargetState`], so a condition that
//! persists across checks alerts once per transition and never once per check.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::compose::event_to_alert;
use super::model::{build_alert_id, AlertLevel, AlertPayload, ChangeEvent};
use crate::state::TargetState;

/// Phase classified from status page text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Operational,
    MajorOutage,
    PartialOutage,
    Degraded,
    Maintenance,
    Monitoring,
    #[default]
    Unknown,
}

impl Phase {
    /// Classify page text by keyword, strongest signal first
    pub fn classify(text: &str) -> Phase {
        let lowered = text.to_lowercase();
        if lowered.contains("all systems operational") || lowered.contains("active incidents 0") {
            Phase::Operational
        } else if lowered.contains("major outage") {
            Phase::MajorOutage
        } else if lowered.contains("partial outage") {
            Phase::PartialOutage
        } else if lowered.contains("degraded") {
            Phase::Degraded
        } else if lowered.contains("maintenance") {
            Phase::Maintenance
        } else if lowered.contains("monitoring") || lowered.contains("incident") {
            Phase::Monitoring
        } else if lowered.contains("operational") {
            Phase::Operational
        } else {
            Phase::Unknown
        }
    }

    pub fn parse(value: &str) -> Phase {
        match value {
            "operational" => Phase::Operational,
            "major_outage" => Phase::MajorOutage,
            "partial_outage" => Phase::PartialOutage,
            "degraded" => Phase::Degraded,
            "maintenance" => Phase::Maintenance,
            "monitoring" => Phase::Monitoring,
            _ => Phase::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Operational => "operational",
            Phase::MajorOutage => "major_outage",
            Phase::PartialOutage => "partial_outage",
            Phase::Degraded => "degraded",
            Phase::Maintenance => "maintenance",
            Phase::Monitoring => "monitoring",
            Phase::Unknown => "unknown",
        }
    }

    /// Human wording, e.g. "major outage"
    pub fn label(self) -> String {
        self.as_str().replace('_', " ")
    }

    pub fn level(self) -> AlertLevel {
        match self {
            Phase::MajorOutage | Phase::PartialOutage | Phase::Degraded => AlertLevel::Critical,
            Phase::Maintenance | Phase::Monitoring => AlertLevel::Warning,
            Phase::Operational => AlertLevel::Resolved,
            Phase::Unknown => AlertLevel::Info,
        }
    }

    /// Any phase that opens or continues an incident
    pub fn is_incident(self) -> bool {
        !matches!(self, Phase::Operational | Phase::Unknown)
    }

    /// Phases the backup path is allowed to escalate on its own
    pub fn is_backup_outage(self) -> bool {
        matches!(
            self,
            Phase::MajorOutage | Phase::PartialOutage | Phase::Degraded | Phase::Maintenance
        )
    }
}

/// State reported by the primary uptime monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryStatus {
    Up,
    Down,
    Validating,
    Paused,
    Pending,
    Maintenance,
    #[default]
    Unknown,
}

impl PrimaryStatus {
    pub fn normalize(value: &str) -> PrimaryStatus {
        match value.trim().to_lowercase().as_str() {
            "up" => PrimaryStatus::Up,
            "down" => PrimaryStatus::Down,
            "validating" => PrimaryStatus::Validating,
            "paused" => PrimaryStatus::Paused,
            "pending" => PrimaryStatus::Pending,
            "maintenance" => PrimaryStatus::Maintenance,
            _ => PrimaryStatus::Unknown,
        }
    }

    pub fn is_down(self) -> bool {
        self == PrimaryStatus::Down
    }
}

/// What a status checker saw on this pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusObservation {
    pub phase: Phase,
    pub content_hash: String,
}

impl StatusObservation {
    /// Rebuild the previous observation from checker-owned keys
    pub fn from_state(state: &TargetState) -> Option<Self> {
        let phase = state.checker_str("phase")?;
        Some(Self {
            phase: Phase::parse(phase),
            content_hash: state.checker_str("content_hash").unwrap_or_default().to_string(),
        })
    }
}

/// Gate thresholds
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Minimum time a phase must stay non-operational before `incident_started`
    pub incident_delay: TimeDelta,
    /// How long the primary must stay silent before the backup path alerts
    pub backup_alert_delay: TimeDelta,
    /// Consecutive fetch failures before an "unreachable" alert
    pub unreachable_after: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            incident_delay: TimeDelta::zero(),
            backup_alert_delay: TimeDelta::minutes(10),
            unreachable_after: 3,
        }
    }
}

/// Identity of the target being gated
#[derive(Debug, Clone, Copy)]
pub struct GateTarget<'a> {
    pub id: &'a str,
    pub link: Option<&'a str>,
}

/// Per-target incident state machine
#[derive(Debug, Clone, Default)]
pub struct IncidentGate {
    config: GateConfig,
}

impl IncidentGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Track the incident lifecycle of the scraped phase.
    ///
    /// Emits `incident_started` once per incident (after the configured
    /// delay), `status_update` whenever an alerted incident changes phase or
    /// content, and exactly one `incident_resolved` when the page goes quiet.
    pub fn observe_phase(
        &self,
        target: GateTarget<'_>,
        state: &mut TargetState,
        previous: Option<&StatusObservation>,
        current: &StatusObservation,
        now: DateTime<Utc>,
    ) -> Vec<ChangeEvent> {
        let prev_phase = previous.map(|p| p.phase).unwrap_or_default();
        let prev_hash = previous.map(|p| p.content_hash.as_str());
        let phase = current.phase;
        let mut events = Vec::new();

        if phase.is_incident() {
            let since = *state.pending_incident_since.get_or_insert(now);

            if state.incident_alerted {
                if phase != prev_phase || prev_hash != Some(current.content_hash.as_str()) {
                    events.push(
                        ChangeEvent::new(
                            target.id,
                            "status_update",
                            format!("Status update: {}", phase.label()),
                            now,
                        )
                        .with_severity(phase.level())
                        .with_link(target.link),
                    );
                }
            } else if now - since >= self.config.incident_delay {
                events.push(
                    ChangeEvent::new(
                        target.id,
                        "incident_started",
                        format!("Incident detected: {}", phase.label()),
                        now,
                    )
                    .with_severity(phase.level())
                    .with_link(target.link),
                );
                state.incident_alerted = true;
            }
        } else {
            let was_open = state.incident_alerted || prev_phase.is_incident();
            state.pending_incident_since = None;
            state.incident_alerted = false;
            if was_open {
                events.push(
                    ChangeEvent::new(
                        target.id,
                        "incident_resolved",
                        "Service recovered and is operational",
                        now,
                    )
                    .with_severity(AlertLevel::Resolved)
                    .with_link(target.link),
                );
            }
        }

        events
    }

    /// Combine the backup phase with the primary signal into alerts.
    ///
    /// A primary that already reports down owns the outage, so the backup
    /// path stays silent. A primary that stays up while the page reports an
    /// outage starts a silence timer; once it exceeds the configured delay a
    /// single "backup incident" alert fires and later `status_update` events
    /// are forwarded tagged `backup_signal`, until the page recovers and one
    /// resolution alert closes it.
    pub fn gate_backup(
        &self,
        target: GateTarget<'_>,
        state: &mut TargetState,
        phase: Phase,
        primary: PrimaryStatus,
        events: &[ChangeEvent],
        now: DateTime<Utc>,
    ) -> Vec<AlertPayload> {
        state.primary_state = Some(primary);
        let mut alerts = Vec::new();
        let mut active = state.backup_alert_active;

        if phase.is_backup_outage() {
            if primary.is_down() {
                state.primary_silent_since = None;
            } else {
                let silent_since = *state.primary_silent_since.get_or_insert(now);
                let delay = self.config.backup_alert_delay;

                if now - silent_since >= delay && !active {
                    let label = phase.label();
                    alerts.push(
                        AlertPayload::new(
                            build_alert_id(target.id, &format!("primary_silent_{}", label), now),
                            target.id,
                            phase.level(),
                            format!("⚠️ {} backup incident", target.id),
                            format!(
                                "Backup check detected {} while the primary monitor stayed operational for at least {} minutes.",
                                label,
                                delay.num_minutes()
                            ),
                            now,
                        )
                        .with_links(target.link, 1)
                        .with_tag("backup_signal")
                        .with_tag("primary_silent"),
                    );
                    active = true;
                }

                if active {
                    alerts.extend(
                        events
                            .iter()
                            .filter(|event| event.kind == "status_update")
                            .map(|event| event_to_alert(event).with_tag("backup_signal")),
                    );
                }
            }
        } else {
            state.primary_silent_since = None;
            if active {
                alerts.push(
                    AlertPayload::new(
                        build_alert_id(target.id, "backup_incident_resolved", now),
                        target.id,
                        AlertLevel::Resolved,
                        format!("🟢 {} backup incident resolved", target.id),
                        "Backup-detected incident has recovered.",
                        now,
                    )
                    .with_links(target.link, 1)
                    .with_tag("backup_signal")
                    .with_tag("resolved"),
                );
                active = false;
            }
        }

        state.backup_alert_active = active;
        alerts
    }

    /// Edge-triggered alert once consecutive failures reach the threshold.
    ///
    /// Expects `state` to already carry the incremented failure count.
    pub fn unreachable_alert(
        &self,
        target: GateTarget<'_>,
        state: &mut TargetState,
        error: &str,
        now: DateTime<Utc>,
    ) -> Option<AlertPayload> {
        let failures = state.consecutive_failures;
        if failures < self.config.unreachable_after || state.unreachable_alerted {
            return None;
        }
        state.unreachable_alerted = true;
        Some(
            AlertPayload::new(
                build_alert_id(target.id, "unreachable", now),
                target.id,
                AlertLevel::Warning,
                format!("⚠️ {} unreachable", target.id),
                format!(
                    "{} has been unreachable for {} consecutive checks. Last error: {}",
                    target.id, failures, error
                ),
                now,
            )
            .with_links(target.link, 1)
            .with_tag("unreachable"),
        )
    }

    /// Recovery alert, judged on the failure count read before this check reset it
    pub fn reachable_again_alert(
        &self,
        target: GateTarget<'_>,
        previous_failures: u32,
        now: DateTime<Utc>,
    ) -> Option<AlertPayload> {
        if previous_failures < self.config.unreachable_after {
            return None;
        }
        Some(
            AlertPayload::new(
                build_alert_id(target.id, "reachable_again", now),
                target.id,
                AlertLevel::Resolved,
                format!("🟢 {} reachable again", target.id),
                format!(
                    "{} recovered after {} failed checks.",
                    target.id, previous_failures
                ),
                now,
            )
            .with_links(target.link, 1)
            .with_tag("recovery"),
        )
    }
}
