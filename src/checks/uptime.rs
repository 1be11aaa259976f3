//! Uptime-monitoring API client, the primary incident signal

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use super::fetch::Fetcher;
use super::{CheckError, PrimaryMonitor};
use crate::alerts::PrimaryStatus;

pub const BETTERSTACK_URL: &str = "https://uptime.betterstack.com";

const MAX_PAGES: usize = 10;

/// Reads monitor states page by page, following `pagination.next`
pub struct UptimeMonitor {
    fetcher: Fetcher,
    api_base: String,
    token: String,
}

impl UptimeMonitor {
    pub fn new(fetcher: Fetcher, token: impl Into<String>) -> Self {
        Self {
            fetcher,
            api_base: BETTERSTACK_URL.to_string(),
            token: token.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Fold one page into `statuses`, returning the next page url if any
    fn read_page(page: &Value, statuses: &mut HashMap<String, PrimaryStatus>) -> Option<String> {
        if let Some(monitors) = page.get("data").and_then(Value::as_array) {
            for monitor in monitors {
                let id = match monitor.get("id") {
                    Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => continue,
                };
                let status = monitor
                    .get("attributes")
                    .and_then(|attributes| attributes.get("status"))
                    .and_then(Value::as_str);
                if let Some(status) = status {
                    statuses.insert(id, PrimaryStatus::normalize(status));
                }
            }
        }

        page.get("pagination")
            .and_then(|pagination| pagination.get("next"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|next| !next.is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
impl PrimaryMonitor for UptimeMonitor {
    async fn statuses(&self) -> Result<HashMap<String, PrimaryStatus>, CheckError> {
        let auth = format!("Bearer {}", self.token);
        let headers = [("Authorization", auth.as_str()), ("Accept", "application/json")];

        let mut statuses = HashMap::new();
        let mut next = Some(format!("{}/api/v2/monitors", self.api_base));
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= MAX_PAGES {
                tracing::warn!(pages, "Monitor listing truncated");
                break;
            }
            let page = self.fetcher.get_json(&url, &headers, &[]).await?;
            pages += 1;
            next = Self::read_page(&page, &mut statuses);
        }

        Ok(statuses)
    }
}
