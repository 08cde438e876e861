// Logging module - Logging infrastructure
use crate::domain::error::{BridgeError, BridgeResult};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging system; `RUST_LOG` takes precedence over `level`
pub fn init_logging(level: &str) -> BridgeResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("uart2uart={},warn", level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| BridgeError::Config {
            message: format!("Failed to initialize logging: {}", e),
        })?;

    tracing::debug!("uart2uart logging system initialized");
    Ok(())
}
