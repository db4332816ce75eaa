//! Tracing setup for programs embedding the pipeline.
//!
//! Without `RUST_LOG`, the pipeline crates log at the requested level and
//! everything else (runtime, collaborator clients) at `warn`. Each family's
//! worker runs inside [`family_span`], so every event it emits carries the
//! family name.

use cireport_state::JobFamily;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Level, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level.
const PIPELINE_TARGETS: &[&str] = &["cireport_core", "cireport_state"];

/// Shape of emitted log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// Newline-delimited JSON, with the enclosing family span on every line.
    Json,
}

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(PIPELINE_TARGETS.iter().map(|t| format!("{t}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Span wrapping one family's reconciliation pass.
pub fn family_span(family: &JobFamily) -> Span {
    info_span!("cireport.family", family = %family)
}

/// Install the global subscriber. Only the first call in a process wins.
pub fn init_tracing(format: LogFormat, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
            .ok(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init().ok(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_pipeline_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,cireport_core=debug,cireport_state=debug"
        );
    }

    #[test]
    fn test_family_span_names_the_family() {
        let subscriber = tracing_subscriber::registry();
        tracing::subscriber::with_default(subscriber, || {
            let span = family_span(&JobFamily::new("e2e-openstack-4.4"));
            let meta = span.metadata().unwrap();
            assert_eq!(meta.name(), "cireport.family");
            assert!(meta.fields().field("family").is_some());
        });
    }

    #[test]
    fn test_log_format_deserializes() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(LogFormat::Pretty, Level::DEBUG);
        init_tracing(LogFormat::Json, Level::INFO);
    }
}
