//! Alert lifecycle
//!
//! Everything between "a check saw something" and "a human was told about
//! it": the alert model and its dedup identity, composition of events into
//! payloads, incident gating, the retry queue, the daily digest, the run
//! watchdog and the delivery channels.

pub mod compose;
pub mod digest;
pub mod gate;
pub mod model;
pub mod notifier;
pub mod queue;
pub mod watchdog;

pub use digest::{build_daily_digest, DigestSchedule};
pub use gate::{GateConfig, GateTarget, IncidentGate, Phase, PrimaryStatus, StatusObservation};
pub use model::{build_alert_id, AlertLevel, AlertPayload, ChangeEvent, PendingAlert};
pub use notifier::{
    AlertChannel, AlertSender, EmailChannel, EmailConfig, FallbackSender, NotifierError, WebhookChannel,
};
pub use queue::{RetryOutcome, RetryPolicy, RetryQueue};
pub use watchdog::evaluate_watchdog;
