//! Entry point registered in the browser's native messaging manifest.
//!
//! Browsers pass the caller's origin (and on some platforms a window handle)
//! as arguments; they are not needed.

use anyhow::{Context, Result};

use st_cli::{Config, host};

#[tokio::main]
async fn main() -> Result<()> {
    st_cli::init_tracing(false);

    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    host::run_stdio(&config).await
}
