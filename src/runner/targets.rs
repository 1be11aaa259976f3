//! Target registry

use std::fmt;
use std::sync::Arc;

use chrono::TimeDelta;

use crate::checks::{
    AccountFeedChecker, ChangelogChecker, Checker, CommitFeedChecker, Fetcher, SitemapChecker,
    StatusPageChecker,
};
use crate::config::Settings;

/// How a target's results are turned into alerts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// Gated through the incident state machine, optionally corroborated by
    /// the primary monitor with this id
    StatusPage { primary_monitor_id: Option<String> },
    /// New posts of all feeds are grouped into one alert per run
    AccountFeed,
    /// Changelogs, sitemaps and commit feeds: one summary alert per target per run
    Docs,
}

/// One monitored resource
#[derive(Clone)]
pub struct Target {
    pub id: String,
    pub kind: TargetKind,
    pub interval: TimeDelta,
    /// The first link is attached to gate alerts
    pub links: Vec<String>,
    pub checker: Arc<dyn Checker>,
}

impl Target {
    pub fn new(id: impl Into<String>, kind: TargetKind, interval: TimeDelta, checker: Arc<dyn Checker>) -> Self {
        Self {
            id: id.into(),
            kind,
            interval,
            links: Vec::new(),
            checker,
        }
    }

    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }

    pub fn primary_link(&self) -> Option<&str> {
        self.links.first().map(String::as_str)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("interval", &self.interval)
            .field("links", &self.links)
            .finish_non_exhaustive()
    }
}

/// The eight production targets, in dispatch order
pub fn default_targets(settings: &Settings, fetcher: &Fetcher) -> Vec<Target> {
    let urls = &settings.urls;
    let gate = settings.primary_gate.as_ref();

    let x_status_urls = vec![urls.x_status.clone(), urls.x_incidents.clone()];
    let twitterapi_status_urls = vec![urls.twitterapi_status.clone()];

    vec![
        Target::new(
            "x_status",
            TargetKind::StatusPage {
                primary_monitor_id: gate.map(|gate| gate.x_monitor_id.clone()),
            },
            settings.status_interval,
            Arc::new(StatusPageChecker::new(fetcher.clone(), x_status_urls.clone())),
        )
        .with_links(x_status_urls),
        Target::new(
            "twitterapi_status",
            TargetKind::StatusPage {
                primary_monitor_id: gate.map(|gate| gate.twitterapi_monitor_id.clone()),
            },
            settings.status_interval,
            Arc::new(StatusPageChecker::new(fetcher.clone(), twitterapi_status_urls.clone())),
        )
        .with_links(twitterapi_status_urls),
        Target::new(
            "api_tweets",
            TargetKind::AccountFeed,
            settings.tweets_interval,
            Arc::new(AccountFeedChecker::new(
                fetcher.clone(),
                settings.twitterapi_io_key.clone(),
                settings.api_account_name.clone(),
            )),
        ),
        Target::new(
            "xdevelopers_tweets",
            TargetKind::AccountFeed,
            settings.tweets_interval,
            Arc::new(AccountFeedChecker::new(
                fetcher.clone(),
                settings.twitterapi_io_key.clone(),
                settings.xdevelopers_account_name.clone(),
            )),
        ),
        Target::new(
            "x_docs_github",
            TargetKind::Docs,
            settings.docs_interval,
            Arc::new(CommitFeedChecker::new(
                fetcher.clone(),
                settings.github_docs_repo.clone(),
                settings.github_token.clone(),
            )),
        ),
        Target::new(
            "x_changelog",
            TargetKind::Docs,
            settings.docs_interval,
            Arc::new(ChangelogChecker::new(fetcher.clone(), urls.x_changelog.clone())),
        )
        .with_links(vec![urls.x_changelog.clone()]),
        Target::new(
            "twitterapi_changelog",
            TargetKind::Docs,
            settings.docs_interval,
            Arc::new(ChangelogChecker::new(fetcher.clone(), urls.twitterapi_changelog.clone())),
        )
        .with_links(vec![urls.twitterapi_changelog.clone()]),
        Target::new(
            "twitterapi_sitemap",
            TargetKind::Docs,
            settings.docs_interval,
            Arc::new(SitemapChecker::new(
                fetcher.clone(),
                urls.twitterapi_sitemap.clone(),
                settings.sitemap_include.clone(),
                settings.sitemap_exclude.clone(),
            )),
        )
        .with_links(vec![urls.twitterapi_sitemap.clone()]),
    ]
}
