//! Turning check events into alert payloads

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::model::{build_alert_id, AlertLevel, AlertPayload, ChangeEvent};

/// One alert for one event
pub fn event_to_alert(event: &ChangeEvent) -> AlertPayload {
    AlertPayload::new(
        build_alert_id(&event.target, &event.summary, event.occurred_at),
        &event.target,
        event.severity,
        format!("{} {}", event.severity.emoji(), event.target),
        &event.summary,
        event.occurred_at,
    )
    .with_links(event.link.clone(), 1)
    .with_tag(&event.kind)
}

/// Fold every new feed post of a run into a single alert
pub fn group_feed_alert(events: &[ChangeEvent], now: DateTime<Utc>, max_links: usize) -> Option<AlertPayload> {
    if events.is_empty() {
        return None;
    }

    let mut sorted: Vec<&ChangeEvent> = events.iter().collect();
    sorted.sort_by_key(|event| event.occurred_at);

    let accounts: BTreeSet<String> = sorted
        .iter()
        .map(|event| match event.metadata.get("account") {
            Some(serde_json::Value::String(account)) => account.clone(),
            Some(other) => other.to_string(),
            None => "unknown".to_string(),
        })
        .collect();
    let account_label = accounts
        .iter()
        .map(|account| format!("@{}", account))
        .collect::<Vec<_>>()
        .join(", ");

    let body = format!(
        "Detected {} new tweets in the last run across {}. Showing up to {} links.",
        sorted.len(),
        account_label,
        max_links
    );

    Some(
        AlertPayload::new(
            build_alert_id("tweets-grouped", &sorted.len().to_string(), now),
            "tweets",
            AlertLevel::Info,
            "📢 New tweets detected",
            body,
            now,
        )
        .with_links(sorted.iter().filter_map(|event| event.link.clone()), max_links)
        .with_tag("tweets"),
    )
}

/// Summarise one target's events of a run as a single alert
pub fn group_target_alert(
    target: &str,
    events: &[ChangeEvent],
    now: DateTime<Utc>,
    max_links: usize,
) -> AlertPayload {
    let mut lines: Vec<String> = events
        .iter()
        .take(max_links)
        .map(|event| format!("- {}", event.summary))
        .collect();
    let extra = events.len().saturating_sub(lines.len());
    if extra > 0 {
        lines.push(format!("- +{} more", extra));
    }
    let body = lines.join("\n");

    let level = if events.iter().any(|e| e.severity == AlertLevel::Critical) {
        AlertLevel::Critical
    } else if events.iter().any(|e| e.severity == AlertLevel::Warning) {
        AlertLevel::Warning
    } else {
        AlertLevel::Info
    };

    AlertPayload::new(
        build_alert_id(&format!("{}-summary", target), &body, now),
        target,
        level,
        format!("📝 {} updates", target),
        body,
        now,
    )
    .with_links(events.iter().filter_map(|event| event.link.clone()), max_links)
    .with_tag("summary")
}

/// Trim a recorded version; blank values count as absent
pub fn normalize_version(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Informational alert when the deployed build changes between runs
pub fn release_alert(
    previous: Option<&str>,
    current: &str,
    now: DateTime<Utc>,
    first_run: bool,
) -> Option<AlertPayload> {
    if first_run || previous == Some(current) {
        return None;
    }
    let previous = previous.unwrap_or("unknown");
    Some(
        AlertPayload::new(
            build_alert_id("release", &format!("{}->{}", previous, current), now),
            "release",
            AlertLevel::Info,
            format!("🚀 watchpost updated to v{}", current),
            format!("Version changed from v{} to v{}.", previous, current),
            now,
        )
        .with_tag("release")
        .with_tag("version"),
    )
}

/// The only alert delivered on the very first run
pub fn bootstrap_alert(target_count: usize, version: &str, now: DateTime<Utc>) -> AlertPayload {
    AlertPayload::new(
        build_alert_id("init", "initialized", now),
        "bootstrap",
        AlertLevel::Info,
        "🚀 watchpost initialized",
        format!(
            "Monitoring initialized for {} targets. Version: v{}.",
            target_count, version
        ),
        now,
    )
    .with_tag("bootstrap")
}
