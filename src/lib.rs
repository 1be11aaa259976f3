//! Watchpost: Scheduled Monitoring Agent
//!
//! A single-shot monitor meant to be invoked on a schedule. Each run polls a
//! fixed set of external targets (status pages, changelogs, a sitemap, a
//! commit feed and social account feeds), turns what changed into alerts, and
//! delivers them through a chat webhook with an email fallback.
//!
//! # Features
//!
//! - **Incident Gating**: Status-page outages are corroborated against an external uptime monitor
//! - **Deduplicated Delivery**: Minute-granular alert ids and a bounded sent-id set
//! - **Retry Queue**: Failed deliveries survive restarts and back off along a schedule
//! - **Unreachable Tracking**: Edge-triggered alerts on consecutive fetch failures
//! - **Daily Digest**: One local-time rollup of the last 24 hours
//! - **Watchdog**: Detects that the scheduled runs themselves stopped
//! - **Crash-Only State**: Two sorted, pretty-printed JSON documents written atomically
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use watchpost::alerts::{FallbackSender, WebhookChannel};
//! use watchpost::checks::Fetcher;
//! use watchpost::runner::{default_targets, Runner};
//! use watchpost::state::JsonFileStore;
//! use watchpost::Settings;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env()?;
//! let store = JsonFileStore::new(&settings.state_path, &settings.pending_alerts_path)?;
//! let fetcher = Fetcher::new(settings.fetch.clone())?;
//! let sender = FallbackSender::new(Box::new(WebhookChannel::new(&settings.slack_webhook_url)?), None);
//!
//! let runner = Runner::new(
//!     settings.runner_config(),
//!     Arc::new(store),
//!     Arc::new(sender),
//!     default_targets(&settings, &fetcher),
//! );
//! let report = runner.run(chrono::Utc::now()).await?;
//! println!("Delivered {} alerts", report.delivered);
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod checks;
pub mod config;
pub mod runner;
pub mod state;

// Re-export commonly used types
pub use alerts::{AlertLevel, AlertPayload, ChangeEvent, PendingAlert};
pub use config::{ConfigError, Settings};
pub use runner::{RunError, RunReport, Runner, RunnerConfig};
pub use state::{JsonFileStore, PersistedState, StateError, StateStore};
