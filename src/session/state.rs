//! Recording session state machine
//!
//! One `RecordingSession` lives for exactly one RTMP connection attempt.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::counters::{LivenessWatchdog, MediaCounters};
use crate::error::{Error, Result};

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The relay closed the stream
    Success,
    /// The watchdog saw no media between two samples
    NoData,
    /// Anything else went wrong
    Error,
}

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Not dialed yet
    Idle,
    /// Connected, waiting for the login challenge to be answered
    AwaitingChallenge,
    /// Challenge answered, waiting for the stream to be created
    AwaitingStreamReady,
    /// Play sent, media flowing
    Playing,
    /// Terminal
    Closed(Outcome),
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::AwaitingChallenge => write!(f, "awaiting challenge"),
            SessionPhase::AwaitingStreamReady => write!(f, "awaiting stream"),
            SessionPhase::Playing => write!(f, "playing"),
            SessionPhase::Closed(outcome) => write!(f, "closed ({:?})", outcome),
        }
    }
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct RecordingReport {
    pub outcome: Outcome,
    pub bytes_received: u64,
    pub video_messages: u64,
    pub audio_messages: u64,
    pub duration: Duration,
    pub last_received: Option<DateTime<Utc>>,
}

/// State of one recording attempt
#[derive(Debug)]
pub struct RecordingSession {
    phase: SessionPhase,
    started_at: Instant,
    counters: Arc<MediaCounters>,
    watchdog: LivenessWatchdog,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            started_at: Instant::now(),
            counters: Arc::new(MediaCounters::default()),
            watchdog: LivenessWatchdog::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Counters shared with the receive handler
    pub fn counters(&self) -> &Arc<MediaCounters> {
        &self.counters
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, SessionPhase::Closed(_))
    }

    /// Connected, login challenge outstanding
    pub fn await_challenge(&mut self) {
        if self.phase == SessionPhase::Idle {
            self.phase = SessionPhase::AwaitingChallenge;
        }
    }

    /// Challenge answered, stream requested
    pub fn await_stream(&mut self) {
        if self.phase == SessionPhase::AwaitingChallenge {
            self.phase = SessionPhase::AwaitingStreamReady;
        }
    }

    pub fn start_playing(&mut self) {
        if self.phase == SessionPhase::AwaitingStreamReady {
            self.phase = SessionPhase::Playing;
        }
    }

    /// Take a liveness sample; `false` once the byte counter stopped moving
    pub fn sample(&mut self) -> bool {
        self.watchdog.check(self.counters.bytes())
    }

    /// Enter the terminal phase and summarize the session
    pub fn finish(&mut self, result: &Result<()>) -> RecordingReport {
        let outcome = match result {
            Ok(()) => Outcome::Success,
            Err(Error::NoDataTimeout) => Outcome::NoData,
            Err(_) => Outcome::Error,
        };
        if !self.is_closed() {
            self.phase = SessionPhase::Closed(outcome);
        }

        RecordingReport {
            outcome,
            bytes_received: self.counters.bytes(),
            video_messages: self.counters.video_messages(),
            audio_messages: self.counters.audio_messages(),
            duration: self.started_at.elapsed(),
            last_received: self.counters.last_received(),
        }
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}
