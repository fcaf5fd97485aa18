//! Bootstrap utilities for the pipeline binary.

use std::future::Future;
use std::time::Duration;

use backon::Retryable;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::connection_backoff;
use crate::config::{LOG_ENV_VAR, LOG_FORMAT_ENV_VAR};

/// Initialize tracing with the LOYALTY_LOG environment variable.
///
/// Defaults to "info" level if LOYALTY_LOG is not set. Set
/// LOYALTY_LOG_FORMAT=json for one JSON object per line.
pub fn init_tracing() {
    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Connect to a backing service with exponential backoff retry.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "sqlite", "postgres")
/// * `address` - Where the service lives, for logging only
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connection on success, or the last error once retries run out.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = connect
        .retry(connection_backoff())
        .notify(|e: &E, delay: Duration| {
            warn!(
                service = %service_name,
                address = %address,
                error = %e,
                ?delay,
                "Connection failed, retrying"
            );
        })
        .await;

    match &result {
        Ok(_) => info!(service = %service_name, address = %address, "Connected"),
        Err(e) => tracing::error!(
            service = %service_name,
            address = %address,
            error = %e,
            "Giving up on connection"
        ),
    }

    result
}
