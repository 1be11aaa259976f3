//! Sitemap diffing

use std::sync::OnceLock;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};
use serde_json::{Map, Value};

use super::fetch::Fetcher;
use super::{normalize_space, sha256_hex, CheckContext, CheckError, CheckOutcome, Checker};
use crate::alerts::{AlertLevel, ChangeEvent};

/// Changed pages fetched per run
const MAX_PAGES_PER_RUN: usize = 40;

fn title_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("title").expect("valid title selector"))
}

fn heading_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("h1").expect("valid h1 selector"))
}

#[derive(Clone, Copy)]
enum Field {
    Loc,
    Lastmod,
}

/// `(loc, lastmod)` pairs in document order; a missing lastmod reads as ""
pub fn parse_sitemap(xml: &str) -> Result<Vec<(String, String)>, CheckError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut in_url = false;
    let mut field: Option<Field> = None;
    let mut loc = String::new();
    let mut lastmod = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| CheckError::Permanent(format!("Invalid sitemap XML: {}", e)))?;
        match event {
            Event::Start(tag) => match tag.local_name().as_ref() {
                b"url" => {
                    in_url = true;
                    loc.clear();
                    lastmod.clear();
                }
                b"loc" if in_url => field = Some(Field::Loc),
                b"lastmod" if in_url => field = Some(Field::Lastmod),
                _ => {}
            },
            Event::Text(text) => {
                if let Some(current) = field {
                    let value = text
                        .unescape()
                        .map_err(|e| CheckError::Permanent(format!("Invalid sitemap XML: {}", e)))?;
                    match current {
                        Field::Loc => loc.push_str(value.trim()),
                        Field::Lastmod => lastmod.push_str(value.trim()),
                    }
                }
            }
            Event::End(tag) => match tag.local_name().as_ref() {
                b"url" => {
                    in_url = false;
                    if !loc.is_empty() {
                        entries.push((loc.clone(), lastmod.clone()));
                    }
                }
                b"loc" | b"lastmod" => field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

/// "title | h1", or whichever of the two exists
pub fn summarize_page(html: &str) -> String {
    let document = Html::parse_document(html);
    let first_text = |selector: &Selector| {
        document
            .select(selector)
            .next()
            .map(|node| normalize_space(&node.text().collect::<String>()))
            .unwrap_or_default()
    };
    let title = first_text(title_selector());
    let heading = first_text(heading_selector());

    match (title.is_empty(), heading.is_empty()) {
        (false, false) if title != heading => format!("{} | {}", title, heading),
        (false, _) => title,
        (true, false) => heading,
        (true, true) => "(no title)".to_string(),
    }
}

fn string_map(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Watches a sitemap for new or re-dated pages and summarizes each change
pub struct SitemapChecker {
    fetcher: Fetcher,
    url: String,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl SitemapChecker {
    pub fn new(fetcher: Fetcher, url: impl Into<String>, include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
            include,
            exclude,
        }
    }

    /// Include patterns are an allow-list when present; exclude patterns always win
    pub fn is_tracked(&self, url: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| url.contains(p.as_str()));
        included && !self.exclude.iter().any(|p| url.contains(p.as_str()))
    }
}

#[async_trait]
impl Checker for SitemapChecker {
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let xml = self.fetcher.get_text(&self.url, &[], &[]).await?;
        let current: Vec<(String, String)> = parse_sitemap(&xml)?
            .into_iter()
            .filter(|(loc, _)| self.is_tracked(loc))
            .collect();

        let previous_lastmods = string_map(ctx.prior.checker.get("page_lastmods"));
        let mut hashes = string_map(ctx.prior.checker.get("page_hashes"));
        let lastmods: Map<String, Value> = current
            .iter()
            .map(|(loc, lastmod)| (loc.clone(), Value::String(lastmod.clone())))
            .collect();

        if previous_lastmods.is_empty() {
            return Ok(CheckOutcome::default()
                .with_patch("page_lastmods", lastmods)
                .with_patch("page_hashes", hashes));
        }

        let changed: Vec<&String> = current
            .iter()
            .filter(|(loc, lastmod)| previous_lastmods.get(loc).and_then(Value::as_str) != Some(lastmod.as_str()))
            .map(|(loc, _)| loc)
            .take(MAX_PAGES_PER_RUN)
            .collect();

        let mut events = Vec::new();
        for loc in changed {
            match self.fetcher.get_text(loc, &[], &[]).await {
                Ok(html) => {
                    let summary = summarize_page(&html);
                    let hash = sha256_hex(&summary);
                    if hashes.get(loc.as_str()).and_then(Value::as_str) == Some(hash.as_str()) {
                        continue;
                    }
                    hashes.insert(loc.clone(), Value::String(hash));
                    events.push(
                        ChangeEvent::new(ctx.target, "sitemap_change", format!("Updated page: {}", summary), ctx.now)
                            .with_link(Some(loc.clone())),
                    );
                }
                Err(e) => {
                    tracing::debug!(target_id = ctx.target, url = %loc, error = %e, "Changed page fetch failed");
                    events.push(
                        ChangeEvent::new(
                            ctx.target,
                            "sitemap_change_fetch_failed",
                            "Updated page detected but content fetch failed",
                            ctx.now,
                        )
                        .with_severity(AlertLevel::Warning)
                        .with_link(Some(loc.clone())),
                    );
                }
            }
        }

        Ok(CheckOutcome::new(events)
            .with_patch("page_lastmods", lastmods)
            .with_patch("page_hashes", hashes))
    }
}
