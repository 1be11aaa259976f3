//! Settings read from the environment
//!
//! Every knob has a default except the delivery webhook and the feed API key.
//! Settings are built once in `main` and handed to the runner explicitly.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use chrono_tz::Tz;

use crate::alerts::{DigestSchedule, EmailConfig, GateConfig, RetryPolicy};
use crate::checks::FetchConfig;
use crate::runner::RunnerConfig;

/// Credentials and monitor ids for the primary uptime signal
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryGateSettings {
    pub api_token: String,
    pub x_monitor_id: String,
    pub twitterapi_monitor_id: String,
}

/// Endpoints of the monitored targets
#[derive(Debug, Clone, PartialEq)]
pub struct TargetUrls {
    pub x_status: String,
    pub x_incidents: String,
    pub twitterapi_status: String,
    pub x_changelog: String,
    pub twitterapi_changelog: String,
    pub twitterapi_sitemap: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub slack_webhook_url: String,
    /// Present when the email fallback is enabled
    pub email: Option<EmailConfig>,
    pub twitterapi_io_key: String,
    pub github_token: Option<String>,
    pub github_docs_repo: String,
    /// Present when the primary gate is enabled
    pub primary_gate: Option<PrimaryGateSettings>,
    pub urls: TargetUrls,
    pub sitemap_include: Vec<String>,
    pub sitemap_exclude: Vec<String>,
    pub api_account_name: String,
    pub xdevelopers_account_name: String,
    pub status_interval: TimeDelta,
    pub tweets_interval: TimeDelta,
    pub docs_interval: TimeDelta,
    pub gate: GateConfig,
    pub watchdog_max_silence: TimeDelta,
    pub digest: DigestSchedule,
    pub max_links_per_alert: usize,
    pub retry: RetryPolicy,
    pub state_path: PathBuf,
    pub pending_alerts_path: PathBuf,
    pub fetch: FetchConfig,
}

/// Comma list, trimmed, empty items dropped
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Set and non-blank
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parsed<T: FromStr>(&self, name: &str, default: T) -> T {
        self.get(name).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn minutes(&self, name: &'static str, default: i64) -> Result<TimeDelta, ConfigError> {
        self.delta(name, default, TimeDelta::try_minutes)
    }

    fn hours(&self, name: &'static str, default: i64) -> Result<TimeDelta, ConfigError> {
        self.delta(name, default, TimeDelta::try_hours)
    }

    /// Non-negative span in `unit`s
    fn delta(
        &self,
        name: &'static str,
        default: i64,
        unit: fn(i64) -> Option<TimeDelta>,
    ) -> Result<TimeDelta, ConfigError> {
        let value: i64 = self.parsed(name, default);
        let invalid = |reason: &str| ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: reason.to_string(),
        };
        if value < 0 {
            return Err(invalid("must not be negative"));
        }
        unit(value).ok_or_else(|| invalid("duration out of range"))
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => match value.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    value,
                    reason: "expected a boolean".to_string(),
                }),
            },
        }
    }
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let email = if env.flag("ALLOW_EMAIL_FALLBACK", true)? {
            let username = env.required("GMAIL_ADDRESS")?;
            let password = env.required("GMAIL_APP_PASSWORD")?;
            let recipients = split_list(&env.string("ALERT_EMAIL_RECIPIENTS", ""));
            if recipients.is_empty() {
                return Err(ConfigError::Missing("ALERT_EMAIL_RECIPIENTS"));
            }
            Some(EmailConfig {
                smtp_host: env.string("SMTP_HOST", "smtp.gmail.com"),
                smtp_port: env.parsed("SMTP_PORT", 465),
                from: username.clone(),
                username,
                password,
                recipients,
            })
        } else {
            None
        };

        let primary_gate = if env.flag("BETTERSTACK_ENABLE_PRIMARY_GATE", true)? {
            Some(PrimaryGateSettings {
                api_token: env.required("BETTERSTACK_API_TOKEN")?,
                x_monitor_id: env.required("BETTERSTACK_X_MONITOR_ID")?,
                twitterapi_monitor_id: env.required("BETTERSTACK_TWITTERAPI_MONITOR_ID")?,
            })
        } else {
            None
        };

        let schedule_minutes = parse_retry_plan(&env.string("RETRY_PLAN_MINUTES", "1,5,15,60"))?;
        let tail_minutes: u32 = env.parsed("RETRY_TAIL_MINUTES", 360);
        let last_step = schedule_minutes.last().copied().unwrap_or(0);
        if tail_minutes == 0 || tail_minutes < last_step {
            return Err(ConfigError::Invalid {
                name: "RETRY_TAIL_MINUTES",
                value: tail_minutes.to_string(),
                reason: format!("must be positive and at least the last planned delay ({})", last_step),
            });
        }
        let retry = RetryPolicy {
            schedule_minutes,
            tail_minutes,
            max_window: env.hours("RETRY_MAX_HOURS", 48)?,
        };

        let tz_name = env.string("TZ_NAME", "Europe/Lisbon");
        let tz: Tz = tz_name.parse().map_err(|_| ConfigError::Invalid {
            name: "TZ_NAME",
            value: tz_name.clone(),
            reason: "not an IANA time zone".to_string(),
        })?;
        let hour_local: u32 = env.parsed("DIGEST_HOUR_LOCAL", 8);
        if hour_local > 23 {
            return Err(ConfigError::Invalid {
                name: "DIGEST_HOUR_LOCAL",
                value: hour_local.to_string(),
                reason: "hour must be within 0..=23".to_string(),
            });
        }

        Ok(Self {
            slack_webhook_url: env.required("SLACK_WEBHOOK_URL")?,
            email,
            twitterapi_io_key: env.required("TWITTERAPI_IO_KEY")?,
            github_token: env.get("GITHUB_TOKEN"),
            github_docs_repo: env.string("GITHUB_DOCS_REPO", "xdevplatform/docs"),
            primary_gate,
            urls: TargetUrls {
                x_status: env.string("X_STATUS_URL", "https://docs.x.com/status"),
                x_incidents: env.string("X_INCIDENTS_URL", "https://docs.x.com/incidents"),
                twitterapi_status: env.string("TWITTERAPI_STATUS_URL", "https://twitterapi.io/status"),
                x_changelog: env.string("X_CHANGELOG_URL", "https://docs.x.com/changelog"),
                twitterapi_changelog: env.string("TWITTERAPI_CHANGELOG_URL", "https://twitterapi.io/changelog"),
                twitterapi_sitemap: env.string("TWITTERAPI_SITEMAP_URL", "https://twitterapi.io/sitemap.xml"),
            },
            sitemap_include: split_list(&env.string(
                "TWITTERAPI_SITEMAP_INCLUDE_PATTERNS",
                "/readme,/tweet-filter-rules,/changelog,/twitter/,/oapi/",
            )),
            sitemap_exclude: split_list(&env.string(
                "TWITTERAPI_SITEMAP_EXCLUDE_PATTERNS",
                "/blog,/articles,/pricing,/qps-limits,/privacy,/contact,/payment,/affiliate-program",
            )),
            api_account_name: env.string("API_ACCOUNT_NAME", "API"),
            xdevelopers_account_name: env.string("XDEVELOPERS_ACCOUNT_NAME", "XDevelopers"),
            status_interval: env.minutes("STATUS_INTERVAL_MINUTES", 5)?,
            tweets_interval: env.minutes("TWEETS_INTERVAL_MINUTES", 30)?,
            docs_interval: env.minutes("DOCS_INTERVAL_MINUTES", 30)?,
            gate: GateConfig {
                incident_delay: env.minutes("STATUS_INCIDENT_DELAY_MINUTES", 0)?,
                backup_alert_delay: env.minutes("STATUS_BACKUP_ALERT_DELAY_MINUTES", 10)?,
                unreachable_after: env.parsed("UNREACHABLE_ALERT_AFTER_FAILURES", 3),
            },
            watchdog_max_silence: env.minutes("WATCHDOG_MAX_SILENCE_MINUTES", 60)?,
            digest: DigestSchedule { hour_local, tz },
            max_links_per_alert: env.parsed("MAX_LINKS_PER_ALERT", 20),
            retry,
            state_path: PathBuf::from(env.string("STATE_PATH", "state/state.json")),
            pending_alerts_path: PathBuf::from(env.string("PENDING_ALERTS_PATH", "state/pending_alerts.json")),
            fetch: FetchConfig {
                timeout: Duration::from_secs(env.parsed("FETCH_TIMEOUT_SECS", 10)),
                attempts: env.parsed("FETCH_RETRIES", 3),
                max_backoff: Duration::from_secs(env.parsed("FETCH_MAX_BACKOFF_SECS", 30)),
                ..FetchConfig::default()
            },
        })
    }

    /// Runner knobs derived from these settings
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            gate: self.gate.clone(),
            retry: self.retry.clone(),
            digest: self.digest,
            watchdog_max_silence: self.watchdog_max_silence,
            max_links_per_alert: self.max_links_per_alert,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// "1,5,15,60" into positive, non-decreasing minute delays
fn parse_retry_plan(raw: &str) -> Result<Vec<u32>, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        name: "RETRY_PLAN_MINUTES",
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let plan = split_list(raw)
        .iter()
        .map(|item| match item.parse::<u32>() {
            Ok(minutes) if minutes > 0 => Ok(minutes),
            _ => Err(invalid("every delay must be a positive integer")),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if plan.is_empty() {
        return Err(invalid("at least one delay is required"));
    }
    if plan.windows(2).any(|pair| pair[1] < pair[0]) {
        return Err(invalid("delays must not decrease"));
    }
    Ok(plan)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
