//! camwatch: presence watcher and RTMP recorder for a live-broadcast platform
//!
//! The crate talks to the platform on two channels:
//! - A text-line chat protocol over WebSocket, used to authenticate as a guest
//!   and follow broadcaster presence updates
//! - RTMP, used to play a broadcaster's stream and append it to an FLV file
//!
//! # Architecture
//!
//! ```text
//!   WebSocket lines
//!         │
//!         ▼
//!   ProtocolConnection ──(mode A)──► read_single() ──► record once
//!         │
//!      (mode B)
//!         ▼
//!   PresenceTracker ──► PresenceMap (RwLock)
//!         │
//!         ▼  bounded queue, try_send
//!      Watcher ──► RecordingOrchestrator ──► RtmpConnection ──► MediaSink
//! ```
//!
//! # Example: record a broadcaster once
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use camwatch::chat::{ChatConfig, DispatchMode, HttpBootstrap, ProtocolConnection, WsConnector};
//! use camwatch::presence::{extract_model, Extraction};
//!
//! # async fn example() -> camwatch::Result<()> {
//! let config = ChatConfig::default();
//! let bootstrap = Arc::new(HttpBootstrap::new(config.clone())?);
//! let mut conn = ProtocolConnection::connect(
//!     config,
//!     bootstrap,
//!     Arc::new(WsConnector),
//!     Some("somebody"),
//!     DispatchMode::Single,
//! )
//! .await?;
//!
//! let raw = conn.read_single(std::time::Duration::from_secs(60)).await?;
//! if let Extraction::Model(model) = extract_model(&raw)? {
//!     println!("{} is {}", model.name, model.status());
//! }
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

pub mod amf;
pub mod chat;
pub mod client;
pub mod error;
pub mod media;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod watcher;

// Re-export main types for convenience
pub use chat::{ChatConfig, DispatchMode, ProtocolConnection};
pub use client::{RecorderConfig, RecordingOrchestrator, RtmpTarget};
pub use error::{Error, Result};
pub use presence::{ModelState, PresenceMap, PresenceTracker};
pub use watcher::{Watcher, WatcherConfig};
