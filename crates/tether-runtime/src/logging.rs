//! Logging bootstrap
//!
//! The runtime only emits `tracing` events. Hosts that have no subscriber of
//! their own can call [`init_logging`] once at startup.

use std::sync::Once;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive
pub const LOG_ENV_VAR: &str = "TETHER_LOG";

/// Filter used when neither the environment nor the caller sets one
pub const DEFAULT_FILTER: &str = "warn";

static INIT: Once = Once::new();

/// Resolve the effective filter: `TETHER_LOG`, then `fallback`, then `warn`
pub fn resolve_filter(fallback: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(fallback.unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a stderr fmt subscriber; later calls are no-ops
///
/// Does nothing when the host already installed a global subscriber.
pub fn init_logging(fallback: Option<&str>) {
    INIT.call_once(|| {
        let installed = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(resolve_filter(fallback))
            .try_init();

        if installed.is_ok() {
            tracing::debug!("tether logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(Some("tether=debug"));
        init_logging(Some("tether=loud"));
    }

    #[test]
    fn test_invalid_fallback_uses_default() {
        if std::env::var(LOG_ENV_VAR).is_err() {
            let filter = resolve_filter(Some("tether=loud"));
            assert_eq!(filter.to_string(), DEFAULT_FILTER);
        }
    }
}
