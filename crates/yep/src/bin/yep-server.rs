//! Stand-alone YEP server with in-memory stores.
//!
//! Configured through `YEP_*` environment variables; log verbosity through
//! `RUST_LOG` (default `info`).

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use yep::prelude::*;

#[tokio::main]
async fn main() -> Result<(), YepError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(?config, "starting");

    let server = YepServerBuilder::new()
        .config(config)
        .build(
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryCodeStore::new()),
            Arc::new(MemoryMessageLog::new()),
        )
        .await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}
