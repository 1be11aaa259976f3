//! Changelog page diffing

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::fetch::Fetcher;
use super::status::body_text;
use super::{normalize_space, sha256_hex, CheckContext, CheckError, CheckOutcome, Checker};
use crate::alerts::ChangeEvent;

/// Entry ids remembered between runs
const MAX_ENTRY_IDS: usize = 200;
/// New entries reported per run
const MAX_NEW_ENTRIES: usize = 20;
const MAX_CANDIDATES: usize = 120;
const FALLBACK_LINES: usize = 40;
const MIN_LINE_CHARS: usize = 6;

const ENTRY_PREFIXES: &[&str] = &["release", "update", "change", "changelog", "new "];

fn date_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2},\s+\d{4}",
            r"\d{4}-\d{2}-\d{2}",
            r"\d{1,2}/\d{1,2}/\d{4}",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid date pattern"))
        .collect()
    })
}

/// Lines of the page that look like changelog entries
pub fn candidate_lines(html: &str) -> Vec<String> {
    let lines: Vec<String> = body_text(html)
        .lines()
        .map(normalize_space)
        .filter(|line| line.chars().count() >= MIN_LINE_CHARS)
        .collect();

    let mut selected: Vec<String> = lines
        .iter()
        .filter(|line| {
            let lowered = line.to_lowercase();
            date_patterns().iter().any(|pattern| pattern.is_match(line))
                || ENTRY_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix))
        })
        .cloned()
        .collect();

    if selected.is_empty() {
        selected = lines.into_iter().take(FALLBACK_LINES).collect();
    }
    selected.truncate(MAX_CANDIDATES);
    selected
}

/// Emits `changelog_entry` events for lines not seen on earlier runs.
///
/// The first observation of a page only seeds `entry_ids`.
pub struct ChangelogChecker {
    fetcher: Fetcher,
    url: String,
}

impl ChangelogChecker {
    pub fn new(fetcher: Fetcher, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
        }
    }

    fn previous_ids(ctx: &CheckContext<'_>) -> Vec<String> {
        match ctx.prior.checker.get("entry_ids") {
            Some(Value::Array(ids)) => ids
                .iter()
                .map(|id| match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn diff(&self, ctx: &CheckContext<'_>, entries: Vec<String>) -> CheckOutcome {
        let entry_ids: Vec<String> = entries.iter().map(|entry| sha256_hex(entry)).collect();
        let previous = Self::previous_ids(ctx);
        let stored: Vec<Value> = entry_ids
            .iter()
            .take(MAX_ENTRY_IDS)
            .cloned()
            .map(Value::String)
            .collect();

        if previous.is_empty() {
            return CheckOutcome::default().with_patch("entry_ids", stored);
        }

        let seen: HashSet<&str> = previous.iter().map(String::as_str).collect();
        let events = entries
            .iter()
            .zip(&entry_ids)
            .filter(|(_, id)| !seen.contains(id.as_str()))
            .take(MAX_NEW_ENTRIES)
            .map(|(entry, _)| {
                ChangeEvent::new(ctx.target, "changelog_entry", entry.clone(), ctx.now)
                    .with_link(Some(self.url.clone()))
            })
            .collect();

        CheckOutcome::new(events).with_patch("entry_ids", stored)
    }
}

#[async_trait]
impl Checker for ChangelogChecker {
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let html = self.fetcher.get_text(&self.url, &[], &[]).await?;
        let entries = candidate_lines(&html);
        Ok(self.diff(ctx, entries))
    }
}
