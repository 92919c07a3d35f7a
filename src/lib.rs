//! Pulsewatch -- in-process observability pipeline with anomaly detection,
//! pattern matching, event correlation, and automatic incident management.
//!
//! Applications emit structured events through a fluent builder. A bounded
//! queue hands each event to a pool of worker threads that score it against
//! learned baselines, match it against registered patterns, correlate it with
//! recent history, and -- when thresholds are crossed -- open an incident and
//! dispatch it to external sinks (Jira, PagerDuty, Slack).
//!
//! ```no_run
//! use pulsewatch::{global, Config, Severity};
//!
//! let mut config = Config::default();
//! config.service_name = "payment-service".into();
//! config.enable_auto_incidents = true;
//! global::init(config);
//!
//! global::event("payment.processed")
//!     .entity("order_id", "ord-1042")
//!     .metric("amount_usd", 99.99)
//!     .metric("processing_time_ms", 150.0)
//!     .severity(Severity::Info)
//!     .emit();
//!
//! global::shutdown();
//! ```

pub mod config;
pub mod correlate;
pub mod detect;
pub mod event;
pub mod incident;
pub mod integrations;
pub mod pattern;
pub mod pipeline;
pub mod stacktrace;

pub use config::Config;
pub use event::{Event, EventBuilder, Severity};
pub use pipeline::global;
pub use pipeline::{Pipeline, StatsSnapshot};

use thiserror::Error;

/// Errors surfaced by pipeline components.
///
/// None of these cross the producer API: emission is infallible by contract,
/// and recoverable failures are counted or reduced to sentinel values.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("event queue is full")]
    QueueFull,

    #[error("event queue is closed")]
    QueueClosed,

    #[error("invalid pattern regex {pattern:?}: {source}")]
    RegexInvalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("pipeline is not initialized")]
    NotInitialized,

    #[error("pipeline is already initialized")]
    AlreadyInitialized,
}
