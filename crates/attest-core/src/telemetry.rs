//! Tracing setup shared by the `attest` binary and the test harnesses.
//!
//! Validation runs emit structured lifecycle events (see [`crate::obs`]);
//! this module wires up the global subscriber they land on. Plain
//! formatting for terminals, newline-delimited JSON when logs are shipped
//! to an aggregator.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` for filtering when set.
/// Calling this more than once is harmless; only the first call installs
/// a subscriber (the global dispatcher can be set once per process).
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
