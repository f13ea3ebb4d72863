//! Tracing initialisation for waddle binaries.
//!
//! Waddle's own crates log at the requested level while dependencies stay at
//! `warn`. Output goes to stderr so results printed on stdout stay parseable.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets that follow the requested level.
const WADDLE_TARGETS: [&str; 3] = ["waddle", "waddle_core", "waddle_pipeline"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(WADDLE_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber; returns `false` if one was already set.
///
/// With `json`, every event becomes one JSON object with its fields
/// flattened and the enclosing `waddle.run` span (run id, capability)
/// attached, so a run can be followed with a single filter on `run_id`.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_waddle() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,waddle=debug,waddle_core=debug,waddle_pipeline=debug"
        );
        assert!(EnvFilter::try_new(default_directives(Level::INFO)).is_ok());
    }

    #[test]
    fn test_second_init_is_rejected() {
        init_tracing(false, Level::WARN);
        assert!(!init_tracing(true, Level::DEBUG));
        tracing::warn!("still alive");
    }
}
