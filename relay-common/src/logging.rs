//! Logging utilities for the DM relay.
//!
//! Provides structured logging with per-message trace IDs.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls, tungstenite)
//! are set to `warn` level so gateway heartbeats and connection pool chatter
//! stay out of the business logs.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tungstenite",
    "tokio_tungstenite",
];

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogTarget {
    #[default]
    Stdout,
    /// Used when stdout carries console replies.
    Stderr,
}

impl LogTarget {
    fn make_writer(self) -> BoxMakeWriter {
        match self {
            Self::Stdout => BoxMakeWriter::new(std::io::stdout),
            Self::Stderr => BoxMakeWriter::new(std::io::stderr),
        }
    }
}

/// Build the filter directives string for a base level plus exclusions.
fn build_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    for target in excluded_targets {
        directives.push_str(&format!(",{}=warn", target));
    }

    directives
}

/// Initialize logging from the observability configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
/// `log_format` of `"json"` selects structured JSON output, anything else
/// the human-readable format.
pub fn init_logging(config: &ObservabilityConfig) {
    init_logging_to(config, LogTarget::Stdout);
}

/// Initialize logging, writing to `target`.
pub fn init_logging_to(config: &ObservabilityConfig, target: LogTarget) {
    let directives = build_directives(&config.log_level, &config.excluded_targets);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(target.make_writer());
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .with_writer(target.make_writer());
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %config.log_level,
        log_format = %config.log_format,
        target = ?target,
        noise_filtered = NOISY_MODULES.len() + config.excluded_targets.len(),
        "Logging initialized"
    );
}

/// Generate a new trace ID for an inbound message.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
