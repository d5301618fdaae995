//! Recording configuration

use std::time::Duration;

/// Shortest report or sample period; tokio intervals reject zero
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Recording orchestrator configuration options
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Relay URL template, `{relay}` is the relay id
    pub url_template: String,

    /// Playpath template for SD streams, `{room}` is the room id
    pub playpath_template: String,

    /// Playpath template for HD streams
    pub hd_playpath_template: String,

    /// Camera server offset of the current numbering
    pub relay_offset: i64,

    /// Offset used when `relay_offset` gives a non-positive id
    pub fallback_relay_offset: i64,

    /// Room id = model id + room offset
    pub room_offset: u64,

    /// Operation tag sent with `connect`
    pub op_type: String,

    /// Outgoing chunk size
    pub chunk_size: u32,

    /// Wait for the login challenge to be answered
    pub challenge_timeout: Duration,

    /// Wait for the stream-created callback
    pub stream_timeout: Duration,

    /// Progress report period
    pub report_interval: Duration,

    /// Every n-th report is logged at info level
    pub report_log_every: u32,

    /// Liveness sample period
    pub sample_interval: Duration,

    /// Script expressions pinned to `1` before evaluation
    pub placeholders: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            url_template: "rtmp://video{relay}.myfreecams.com:1935/NxServer".into(),
            playpath_template: "mp4:mfc_{room}.f4v".into(),
            hd_playpath_template: "mp4:mfc_a_{room}.f4v".into(),
            relay_offset: -500,
            fallback_relay_offset: 0,
            room_offset: 100_000_000,
            op_type: "DOWNLOAD".into(),
            chunk_size: 100,
            challenge_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(60),
            report_interval: Duration::from_secs(1),
            report_log_every: 10,
            sample_interval: Duration::from_secs(30),
            placeholders: vec!["window.innerWidth".into(), "window.innerHeight".into()],
        }
    }
}

impl RecorderConfig {
    /// Set both relay offsets
    pub fn relay_offsets(mut self, primary: i64, fallback: i64) -> Self {
        self.relay_offset = primary;
        self.fallback_relay_offset = fallback;
        self
    }

    /// Set challenge and stream creation timeouts
    pub fn timeouts(mut self, challenge: Duration, stream: Duration) -> Self {
        self.challenge_timeout = challenge;
        self.stream_timeout = stream;
        self
    }

    /// Set liveness sample period
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval.max(MIN_PERIOD);
        self
    }

    /// Set progress report period and how often a report reaches info level
    pub fn report_interval(mut self, interval: Duration, log_every: u32) -> Self {
        self.report_interval = interval.max(MIN_PERIOD);
        self.report_log_every = log_every.max(1);
        self
    }

    /// Replace the pinned script placeholders
    pub fn placeholders<I, S>(mut self, placeholders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.placeholders = placeholders.into_iter().map(Into::into).collect();
        self
    }

    /// Set outgoing chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}
