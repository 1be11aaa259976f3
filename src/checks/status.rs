//! Status page scraping

use std::sync::OnceLock;

use async_trait::async_trait;
use scraper::{Html, Selector};

use super::fetch::Fetcher;
use super::{normalize_space, sha256_hex, CheckContext, CheckError, CheckOutcome, Checker};
use crate::alerts::{Phase, StatusObservation};

fn body_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("body").expect("valid body selector"))
}

/// Text nodes of the page body, one per line
pub(crate) fn body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    match document.select(body_selector()).next() {
        Some(body) => body.text().collect::<Vec<_>>().join("\n"),
        None => document.root_element().text().collect::<Vec<_>>().join("\n"),
    }
}

/// Visible text of a page, whitespace-normalized
pub fn extract_text(html: &str) -> String {
    normalize_space(&body_text(html))
}

/// Scrapes one or more pages of a status site and classifies the phase.
///
/// The checker only reports what it saw; incident transitions are derived
/// by the incident gate from the previous and current observation.
pub struct StatusPageChecker {
    fetcher: Fetcher,
    urls: Vec<String>,
}

impl StatusPageChecker {
    pub fn new(fetcher: Fetcher, urls: Vec<String>) -> Self {
        Self { fetcher, urls }
    }

    pub fn observe(text: &str) -> StatusObservation {
        StatusObservation {
            phase: Phase::classify(text),
            content_hash: format!("sha256:{}", sha256_hex(text)),
        }
    }
}

#[async_trait]
impl Checker for StatusPageChecker {
    async fn check(&self, _ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let mut contents = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            let html = self.fetcher.get_text(url, &[], &[]).await?;
            contents.push(extract_text(&html));
        }

        let observation = Self::observe(&contents.join("\n"));
        Ok(CheckOutcome::default()
            .with_patch("phase", observation.phase.as_str())
            .with_patch("content_hash", observation.content_hash.clone())
            .with_observation(observation))
    }
}
