//! RTMP recording client
//!
//! - `target`: relay URL and playpath for a broadcaster
//! - `challenge`: the `loginResult` script challenge
//! - `transport`: dialer, connection and handler seams
//! - `connector`: `TcpDialer`, the TCP implementation of those seams
//! - `recorder`: `RecordingOrchestrator`, one session from dial to close

pub mod challenge;
pub mod config;
pub mod connector;
pub mod recorder;
pub mod target;
pub mod transport;

pub use challenge::{BoaEvaluator, ChallengeSolver, ScriptEvaluator};
pub use config::RecorderConfig;
pub use connector::TcpDialer;
pub use recorder::RecordingOrchestrator;
pub use target::RtmpTarget;
pub use transport::{RtmpConnection, RtmpDialer, RtmpHandler, RtmpSender};
