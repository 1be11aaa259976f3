//! Alert model types

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Severity attached to events and alerts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Critical,
    Warning,
    #[default]
    Info,
    Resolved,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Critical => "critical",
            AlertLevel::Warning => "warning",
            AlertLevel::Info => "info",
            AlertLevel::Resolved => "resolved",
        }
    }

    /// Title prefix used by the chat channel
    pub fn emoji(self) -> &'static str {
        match self {
            AlertLevel::Critical => "🔴",
            AlertLevel::Warning => "⚠️",
            AlertLevel::Info => "📝",
            AlertLevel::Resolved => "🟢",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change detected by a target check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Target that produced the event
    pub target: String,
    /// One-line description
    pub summary: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub severity: AlertLevel,
    pub occurred_at: DateTime<Utc>,
    /// Free-form tag, e.g. `incident_started` or `new_tweet`
    pub kind: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ChangeEvent {
    /// Create an info-level event without a link
    pub fn new(
        target: impl Into<String>,
        kind: impl Into<String>,
        summary: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            target: target.into(),
            summary: summary.into(),
            link: None,
            severity: AlertLevel::Info,
            occurred_at,
            kind: kind.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: AlertLevel) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_link(mut self, link: Option<impl Into<String>>) -> Self {
        self.link = link.map(Into::into);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An outbound notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Stable dedup key, see [`build_alert_id`]
    pub alert_id: String,
    pub source: String,
    pub level: AlertLevel,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub links: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl AlertPayload {
    pub fn new(
        alert_id: impl Into<String>,
        source: impl Into<String>,
        level: AlertLevel,
        title: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id: alert_id.into(),
            source: source.into(),
            level,
            title: title.into(),
            body: body.into(),
            links: Vec::new(),
            created_at,
            tags: BTreeSet::new(),
        }
    }

    /// Append links in order, keeping at most `cap` in total
    pub fn with_links<I, S>(mut self, links: I, cap: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let room = cap.saturating_sub(self.links.len());
        self.links.extend(links.into_iter().take(room).map(Into::into));
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// An alert that failed delivery at least once and waits for a retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAlert {
    pub payload: AlertPayload,
    pub attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
}

impl PendingAlert {
    /// Structural checks applied to records read back from disk
    pub fn validate(&self) -> Result<(), String> {
        if self.payload.alert_id.trim().is_empty() {
            return Err("empty alert_id".to_string());
        }
        if self.attempts == 0 {
            return Err("attempts must be at least 1".to_string());
        }
        if self.next_retry_at < self.first_failed_at {
            return Err("next_retry_at precedes first_failed_at".to_string());
        }
        Ok(())
    }
}

/// Deterministic alert id from (source, summary, timestamp truncated to the minute).
///
/// Regenerating the same detection within one minute yields the same id, so
/// delivery bookkeeping can recognise it. The id is the first 24 hex chars of
/// a SHA-256 over the three parts.
pub fn build_alert_id(source: &str, summary: &str, at: DateTime<Utc>) -> String {
    let minute = at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at);
    let raw = format!("{}|{}|{}", source, summary, minute.to_rfc3339());
    let mut encoded = hex::encode(Sha256::digest(raw.as_bytes()));
    encoded.truncate(24);
    encoded
}
