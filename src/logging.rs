use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the global `tracing` subscriber.
///
/// Honors `RUST_LOG` if set, otherwise defaults to `info`. Called once
/// from `main` before any other component is constructed.
pub fn setup_logging() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact(),
        )
        .with(env_filter)
        .init();

    Ok(())
}
