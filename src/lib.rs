//! CodeRelay: real-time coordination hub for collaborative code analysis
//!
//! This library provides the building blocks of a WebSocket hub where
//! clients subscribe to per-file analysis updates, push live edits, and
//! receive fanned-out results. Expensive analysis work is delegated to a
//! pluggable [`collaborator::AnalysisCollaborator`]; the hub contributes
//! connection lifecycle, subscription bookkeeping, debounced coalescing of
//! edit bursts, result caching, and best-effort fan-out.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use coderelay::config::HubConfig;
//! use coderelay::collaborator::NullCollaborator;
//! use coderelay::hub::{handle_connection, Hub};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let hub = Hub::spawn(HubConfig::default(), Arc::new(NullCollaborator));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:9848").await?;
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         tokio::spawn(handle_connection(stream, hub.clone()));
//!     }
//! }
//! ```

pub mod cache;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod hub;

pub use cache::{fingerprint, CacheStats, ResultCache};
pub use collaborator::AnalysisCollaborator;
pub use config::HubConfig;
pub use error::{HubError, Result};
pub use hub::{Hub, HubHandle, HubStats};
