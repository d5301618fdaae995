//! Media byte accounting and liveness sampling

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Counters updated by the receive handler, read by the watchdog
#[derive(Debug, Default)]
pub struct MediaCounters {
    bytes: AtomicU64,
    video: AtomicU64,
    audio: AtomicU64,
    last_received: Mutex<Option<DateTime<Utc>>>,
}

impl MediaCounters {
    pub fn record_video(&self, len: usize) {
        self.video.fetch_add(1, Ordering::Relaxed);
        self.record(len);
    }

    pub fn record_audio(&self, len: usize) {
        self.audio.fetch_add(1, Ordering::Relaxed);
        self.record(len);
    }

    fn record(&self, len: usize) {
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        let mut last = self
            .last_received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Utc::now());
    }

    /// Media payload bytes received so far
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn video_messages(&self) -> u64 {
        self.video.load(Ordering::Relaxed)
    }

    pub fn audio_messages(&self) -> u64 {
        self.audio.load(Ordering::Relaxed)
    }

    /// Wall clock time of the last media message
    pub fn last_received(&self) -> Option<DateTime<Utc>> {
        *self
            .last_received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bytes as MiB, for progress logs
    pub fn megabytes(&self) -> f64 {
        self.bytes() as f64 / (1024.0 * 1024.0)
    }
}

/// Compares the byte counter against the previous sample
#[derive(Debug, Default)]
pub struct LivenessWatchdog {
    last_sample: u64,
}

impl LivenessWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if the counter moved since the last check
    pub fn check(&mut self, current: u64) -> bool {
        let alive = current != self.last_sample;
        self.last_sample = current;
        alive
    }
}
