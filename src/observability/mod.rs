//! Observability subsystem for aerofed
//!
//! Provides:
//! - Structured logging (JSON lines on stderr)
//! - Typed lifecycle events
//! - Federation counters
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. Logging never fails or alters the operation being observed
//! 3. No background threads
//!
//! # Usage
//!
//! ```ignore
//! use aerofed::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::ConnectionOpened, &[("source", "federated")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity, LOG_ENV_VAR};
pub use metrics::{FederationMetrics, MetricsSnapshot};

/// Log a lifecycle event at its default severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields at its default severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
