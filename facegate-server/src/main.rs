//! Facegate server binary
//!
//! Serves access-control terminals over WebSocket and runs the job scheduling loops.

use facegate_server::{FacegateServer, ServerConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialize logging
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("facegate=info,facegate_server=info"));
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(filter)
    .init();

  let config = ServerConfig::from_env()?;
  info!("Starting facegate-server on {}", config.addr);
  info!("Data directory: {}", config.data_dir.display());
  if config.admin.is_some() {
    info!("🔐 Operator routes enabled with basic authentication");
  }

  let server = FacegateServer::from_config(config).await?;
  server.run().await?;

  Ok(())
}
