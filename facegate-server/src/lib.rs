//! # Facegate Server
//!
//! WebSocket gateway server for Facegate access-control terminals.
//!
//! ## Overview
//!
//! Terminals dial in to `/ws` and speak the Facegate JSON protocol; the server keeps one
//! live connection per device and runs the schedule materializer, job dispatcher and retry
//! manager in the background. Two stores are available:
//!
//! - **Memory** (default): In-process storage, no external dependencies
//! - **PostgreSQL** (requires `postgres` feature): used when `DATABASE_URL` is set
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     WebSocket     ┌─────────────────────────────────┐
//! │   Terminal 1    │ ◀────────────────▶│                                 │
//! └─────────────────┘                   │         facegate-server         │
//!                                       │                                 │
//! ┌─────────────────┐     WebSocket     │  /ws             device RPC     │
//! │   Terminal 2    │ ◀────────────────▶│  /health         status         │
//! └─────────────────┘                   │  /facegate/images static files  │
//!                                       │  /api/*          operator (auth)│
//! ┌─────────────────┐       HTTP        │                                 │
//! │    Operator     │ ─────────────────▶│                                 │
//! └─────────────────┘                   └─────────────────────────────────┘
//! ```
//!
//! ### Starting the server
//!
//! ```rust,ignore
//! use facegate_server::{FacegateServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     let server = FacegateServer::from_config(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod server;

pub use config::{BasicAuth, ServerConfig};
pub use error::{Error, Result};
pub use server::FacegateServer;
