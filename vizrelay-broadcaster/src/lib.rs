//! Real-time frequency frame relay for music visualizers
//!
//! This crate provides a WebSocket hub that takes frequency-band frames from a
//! single producer (the music bot) and fans them out to many visualizer
//! viewers. It manages the source slot, a capped viewer set, liveness probing
//! and relay statistics.
//!
//! # Features
//!
//! - One WebSocket endpoint for both roles, classified by `User-Agent`
//! - At most one source; a new source closes the old one
//! - Viewer cap with an explicit `1008 "Server full"` close
//! - Non-blocking fan-out: slow viewers skip frames, dead ones are removed
//! - Ping/pong liveness sweep
//! - `/health` and `/stats` JSON endpoints plus an HTML status page
//!
//! # Wire Messages
//!
//! - `fft` - frame from the source, relayed verbatim
//! - `status` - relay state sent to viewers
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use vizrelay_broadcaster::{server, HubConfig, RelayHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Arc::new(RelayHub::new(HubConfig::default()));
//!     let heartbeat = hub.spawn_heartbeat();
//!     let reporter = hub.spawn_stats_reporter();
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     let shutdown_hub = Arc::clone(&hub);
//!     server::serve(listener, Arc::clone(&hub), async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown_hub.shutdown();
//!     })
//!     .await?;
//!
//!     heartbeat.abort();
//!     reporter.abort();
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod role;
pub mod server;
pub mod stats;

// Re-exports
pub use broadcaster::{ForwardReport, HeartbeatReport, HubConfig, RelayHub, RelayStatus};
pub use client::{ClientHandle, ConnectionId, Delivery, Disconnect, PeerInfo};
pub use error::{RelayError, Result};
pub use events::{FrequencyFrame, StatusUpdate, WireMessage};
pub use role::{Role, RoleClassifier};
pub use stats::{RelayStats, StatsSnapshot};
