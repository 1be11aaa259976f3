//! Target checks
//!
//! A checker polls one external target, compares what it sees with the
//! checker-owned keys of the prior [`TargetState`], and reports new change
//! events plus a patch for those keys. Checkers never touch the fields the
//! runner owns; the runner applies the patch and does all the gating.

pub mod changelog;
pub mod commits;
pub mod fetch;
pub mod sitemap;
pub mod status;
pub mod tweets;
pub mod uptime;

pub use changelog::ChangelogChecker;
pub use commits::CommitFeedChecker;
pub use fetch::{FetchConfig, FetchError, Fetcher};
pub use sitemap::SitemapChecker;
pub use status::StatusPageChecker;
pub use tweets::AccountFeedChecker;
pub use uptime::UptimeMonitor;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::alerts::{ChangeEvent, PrimaryStatus, StatusObservation};
use crate::state::TargetState;

/// Inputs of one check
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub target: &'a str,
    pub prior: &'a TargetState,
    pub now: DateTime<Utc>,
}

/// Result of one successful check
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub events: Vec<ChangeEvent>,
    /// Shallow-merged into the checker-owned keys of the target record
    pub state_patch: Map<String, Value>,
    /// Phase seen by a status-page checker, fed to the incident gate
    pub observation: Option<StatusObservation>,
}

impl CheckOutcome {
    pub fn new(events: Vec<ChangeEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn with_patch(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state_patch.insert(key.into(), value.into());
        self
    }

    pub fn with_observation(mut self, observation: StatusObservation) -> Self {
        self.observation = Some(observation);
        self
    }
}

/// Polls one target and diffs it against the prior record
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError>;
}

/// Authoritative up/down source keyed by monitor id
#[async_trait]
pub trait PrimaryMonitor: Send + Sync {
    async fn statuses(&self) -> Result<HashMap<String, PrimaryStatus>, CheckError>;
}

/// Lowercase hex SHA-256
pub(crate) fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Collapse runs of whitespace into single spaces
pub(crate) fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// Worth trying again on the next run
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl CheckError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckError::Transient(_))
    }
}

impl From<FetchError> for CheckError {
    fn from(err: FetchError) -> Self {
        if err.is_transient() {
            CheckError::Transient(err.to_string())
        } else {
            CheckError::Permanent(err.to_string())
        }
    }
}
