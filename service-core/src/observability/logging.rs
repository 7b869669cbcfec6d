use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;
use crate::error::AppError;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `log_level` when set. Fails if a global subscriber
/// is already installed, so callers that may run twice (tests) can ignore
/// the error.
pub fn init_tracing(service_name: &str, log_level: &str, format: LogFormat) -> Result<(), AppError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(true)
                    .with_line_number(true)
                    .json()
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(true)
                    .with_line_number(true)
                    .pretty(),
            )
            .try_init(),
    };

    result.map_err(|e| {
        AppError::TelemetryError(format!(
            "Failed to initialize tracing for service '{}': {}",
            service_name, e
        ))
    })?;

    tracing::info!(service = service_name, "Tracing initialized");
    Ok(())
}
