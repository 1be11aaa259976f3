//! Commit feed of a code-hosting repository

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::fetch::Fetcher;
use super::{CheckContext, CheckError, CheckOutcome, Checker};
use crate::alerts::ChangeEvent;

pub const GITHUB_API_URL: &str = "https://api.github.com";

const COMMITS_PER_PAGE: &str = "20";
const FILES_IN_SUMMARY: usize = 3;
const FILES_IN_METADATA: usize = 20;

#[derive(Debug, Deserialize)]
struct CommitRef {
    #[serde(default)]
    sha: String,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CommitDetails {
    #[serde(default)]
    commit: CommitBody,
    #[serde(default)]
    files: Vec<ChangedFile>,
}

#[derive(Debug, Default, Deserialize)]
struct CommitBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChangedFile {
    #[serde(default)]
    filename: String,
}

/// `"Commit: <subject> | files: a, b, c"`
fn summarize(sha: &str, message: &str, files: &[String]) -> String {
    let subject = message.lines().next().unwrap_or_default().trim();
    let mut summary = if subject.is_empty() {
        format!("Commit: {}", sha.chars().take(12).collect::<String>())
    } else {
        format!("Commit: {}", subject)
    };
    if !files.is_empty() {
        let shown: Vec<&str> = files.iter().take(FILES_IN_SUMMARY).map(String::as_str).collect();
        summary.push_str(&format!(" | files: {}", shown.join(", ")));
    }
    summary
}

/// Reports commits pushed since the last seen sha, oldest first
pub struct CommitFeedChecker {
    fetcher: Fetcher,
    api_base: String,
    repo: String,
    token: Option<String>,
}

impl CommitFeedChecker {
    pub fn new(fetcher: Fetcher, repo: impl Into<String>, token: Option<String>) -> Self {
        Self {
            fetcher,
            api_base: GITHUB_API_URL.to_string(),
            repo: repo.into(),
            token,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, CheckError> {
        let auth = self.token.as_ref().map(|token| format!("Bearer {}", token));
        let mut headers = vec![
            ("Accept", "application/vnd.github+json"),
            ("X-GitHub-Api-Version", "2022-11-28"),
        ];
        if let Some(auth) = auth.as_deref() {
            headers.push(("Authorization", auth));
        }
        Ok(self.fetcher.get_json(url, &headers, query).await?)
    }
}

#[async_trait]
impl Checker for CommitFeedChecker {
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let listing = self
            .get(
                &format!("{}/repos/{}/commits", self.api_base, self.repo),
                &[("per_page", COMMITS_PER_PAGE)],
            )
            .await?;
        let commits: Vec<CommitRef> = match listing {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        };

        let Some(latest) = commits.first() else {
            return Ok(CheckOutcome::default());
        };
        let latest_sha = latest.sha.clone();

        let previous_sha = ctx.prior.checker_str("last_commit_sha").unwrap_or_default();
        if previous_sha.is_empty() {
            return Ok(CheckOutcome::default().with_patch("last_commit_sha", latest_sha));
        }

        let new_commits: Vec<&CommitRef> = commits
            .iter()
            .take_while(|commit| !commit.sha.is_empty() && commit.sha != previous_sha)
            .collect();

        let mut events = Vec::with_capacity(new_commits.len());
        for commit in new_commits.into_iter().rev() {
            let details: CommitDetails = serde_json::from_value(
                self.get(&format!("{}/repos/{}/commits/{}", self.api_base, self.repo, commit.sha), &[])
                    .await?,
            )
            .unwrap_or_default();

            let files: Vec<String> = details
                .files
                .into_iter()
                .map(|file| file.filename)
                .take(FILES_IN_METADATA)
                .collect();
            let summary = summarize(&commit.sha, &details.commit.message, &files);

            events.push(
                ChangeEvent::new(ctx.target, "github_commit", summary, ctx.now)
                    .with_link(commit.html_url.clone().filter(|url| !url.is_empty()))
                    .with_metadata("sha", commit.sha.clone())
                    .with_metadata("files", files),
            );
        }

        Ok(CheckOutcome::new(events).with_patch("last_commit_sha", latest_sha))
    }
}
