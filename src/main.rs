//! Watchpost
//!
//! Run with: cargo run
//!
//! Performs one monitoring pass and exits; schedule it externally (cron, CI
//! schedule, systemd timer). Only one run may touch the state files at a time.
//!
//! Environment variables (an optional `.env` file is loaded first):
//! - SLACK_WEBHOOK_URL: Chat webhook (required)
//! - TWITTERAPI_IO_KEY: Feed API key (required)
//! - ALLOW_EMAIL_FALLBACK: Enable SMTP fallback (default: true)
//! - BETTERSTACK_ENABLE_PRIMARY_GATE: Corroborate status pages (default: true)
//! - STATE_PATH / PENDING_ALERTS_PATH: Persisted documents (default: state/*.json)
//! - RUST_LOG: Log filter (default: watchpost=info)
//!
//! See `Settings` for the full list.

use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watchpost::alerts::{AlertChannel, EmailChannel, FallbackSender, WebhookChannel};
use watchpost::checks::{Fetcher, UptimeMonitor};
use watchpost::runner::{default_targets, Runner};
use watchpost::{JsonFileStore, Settings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchpost=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let store = JsonFileStore::new(&settings.state_path, &settings.pending_alerts_path)?;
    let fetcher = Fetcher::new(settings.fetch.clone())?;

    let webhook: Box<dyn AlertChannel> = Box::new(WebhookChannel::new(&settings.slack_webhook_url)?);
    let email = settings
        .email
        .clone()
        .map(|config| Box::new(EmailChannel::new(config)) as Box<dyn AlertChannel>);
    let sender = FallbackSender::new(webhook, email);

    let targets = default_targets(&settings, &fetcher);
    let mut runner = Runner::new(settings.runner_config(), Arc::new(store), Arc::new(sender), targets);
    if let Some(gate) = &settings.primary_gate {
        runner = runner.with_primary_monitor(Arc::new(UptimeMonitor::new(fetcher.clone(), &gate.api_token)));
    }

    tracing::info!(
        state = %settings.state_path.display(),
        targets = runner.targets().len(),
        primary_gate = settings.primary_gate.is_some(),
        email_fallback = settings.email.is_some(),
        "Starting watchpost v{}",
        env!("CARGO_PKG_VERSION")
    );

    let report = runner.run(Utc::now()).await?;

    tracing::info!(
        first_run = report.first_run,
        checked = report.checked,
        failed = report.failed,
        delivered = report.delivered,
        queued = report.queued,
        dropped = report.dropped,
        "Watchpost run complete"
    );

    Ok(())
}
