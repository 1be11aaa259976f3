//! Social account feed

use async_trait::async_trait;
use serde_json::Value;

use super::fetch::Fetcher;
use super::{CheckContext, CheckError, CheckOutcome, Checker};
use crate::alerts::ChangeEvent;

pub const TWITTERAPI_URL: &str = "https://api.twitterapi.io";

const MAX_TEXT_CHARS: usize = 220;
const LIST_KEYS: &[&str] = &["tweets", "data", "results", "items"];
const ID_KEYS: &[&str] = &["id", "tweet_id", "id_str"];
const TEXT_KEYS: &[&str] = &["text", "full_text", "content"];

/// First non-empty value under any of `keys`
fn first_present<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Number(_) => true,
            _ => false,
        })
}

/// Tweet objects from whichever list the response carries
pub fn parse_tweets(payload: &Value) -> Vec<&Value> {
    let list = match payload {
        Value::Array(items) => Some(items),
        Value::Object(obj) => LIST_KEYS.iter().find_map(|key| obj.get(*key).and_then(Value::as_array)),
        _ => None,
    };
    list.map(|items| items.iter().filter(|item| item.is_object()).collect())
        .unwrap_or_default()
}

/// Numeric id of a tweet; ids are compared numerically, never lexically
pub fn tweet_id(item: &Value) -> Option<u64> {
    match first_present(item, ID_KEYS)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

fn tweet_url(account: &str, item: &Value, id: u64) -> String {
    match item.get("url").and_then(Value::as_str) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => format!("https://x.com/{}/status/{}", account, id),
    }
}

fn tweet_text(item: &Value) -> String {
    let text = match first_present(item, TEXT_KEYS) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "(no text)".to_string(),
    };
    text.chars().take(MAX_TEXT_CHARS).collect()
}

/// Reports tweets newer than the highest id seen so far
pub struct AccountFeedChecker {
    fetcher: Fetcher,
    api_base: String,
    api_key: String,
    account: String,
}

impl AccountFeedChecker {
    pub fn new(fetcher: Fetcher, api_key: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            fetcher,
            api_base: TWITTERAPI_URL.to_string(),
            api_key: api_key.into(),
            account: account.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn diff(&self, ctx: &CheckContext<'_>, payload: &Value) -> CheckOutcome {
        let mut tweets: Vec<(u64, &Value)> = parse_tweets(payload)
            .into_iter()
            .filter_map(|item| tweet_id(item).map(|id| (id, item)))
            .collect();
        tweets.sort_by_key(|(id, _)| *id);

        let previous_last = ctx.prior.checker.get("last_tweet_id").and_then(|value| match value {
            Value::String(s) => s.trim().parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        });
        let current_last = tweets.last().map(|(id, _)| *id).max(previous_last);

        let events = match previous_last {
            None => Vec::new(),
            Some(previous) => tweets
                .iter()
                .filter(|(id, _)| *id > previous)
                .map(|(id, item)| {
                    ChangeEvent::new(
                        ctx.target,
                        "new_tweet",
                        format!("New tweet from @{}: {}", self.account, tweet_text(item)),
                        ctx.now,
                    )
                    .with_link(Some(tweet_url(&self.account, item, *id)))
                    .with_metadata("account", self.account.clone())
                    .with_metadata("tweet_id", *id)
                })
                .collect(),
        };

        let outcome = CheckOutcome::new(events);
        match current_last {
            Some(last) => outcome.with_patch("last_tweet_id", last.to_string()),
            None => outcome,
        }
    }
}

#[async_trait]
impl Checker for AccountFeedChecker {
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let payload = self
            .fetcher
            .get_json(
                &format!("{}/twitter/user/last_tweets", self.api_base),
                &[("X-API-Key", self.api_key.as_str()), ("Accept", "application/json")],
                &[("userName", self.account.as_str()), ("count", "50")],
            )
            .await?;
        Ok(self.diff(ctx, &payload))
    }
}
