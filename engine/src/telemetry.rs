//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for the steward binary. The configured level
//! applies to the engine and sdk crates; dependencies stay at `warn` so
//! tokio and friends do not drown out turn and approval logs.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose spans and events follow the configured level
const ENGINE_TARGETS: &[&str] = &["steward_engine", "sdk"];

/// Build the filter directive used when `RUST_LOG` is not set.
fn default_directive(log_level: &str) -> String {
    let mut directive = String::from("warn");
    for target in ENGINE_TARGETS {
        directive.push_str(&format!(",{}={}", target, log_level));
    }
    directive
}

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter.
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}
