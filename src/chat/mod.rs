//! Chat protocol client
//!
//! The control channel is a text-line protocol carried over WebSocket. A
//! connection authenticates as a guest by answering an HTTP-fetched
//! challenge, then either waits for one broadcaster's details or streams
//! every presence update to a consumer.

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod line;
pub mod transport;

pub use bootstrap::{Bootstrap, Challenge, HttpBootstrap};
pub use config::ChatConfig;
pub use connection::{DispatchMode, MessageFeed, ProtocolConnection, Session};
pub use transport::{LineConnector, LineSink, LineSource, WsConnector};
