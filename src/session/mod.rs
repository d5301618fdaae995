//! Recording session state
//!
//! - `state`: phases, outcome and the end-of-session report
//! - `counters`: byte accounting shared with the RTMP read task, and the
//!   liveness watchdog

pub mod counters;
pub mod state;

pub use counters::{LivenessWatchdog, MediaCounters};
pub use state::{Outcome, RecordingReport, RecordingSession, SessionPhase};
