//! Watch one broadcaster and record every time they come online
//!
//! ```text
//! MessageFeed ──► PresenceTracker ──► PresenceMap
//!                       │
//!                       ▼ NotificationQueue (bounded)
//!                   consumer ──► SessionLauncher (one session at a time)
//! ```
//!
//! The consumer never trusts the event itself: it re-reads the map, so a
//! session is only launched for the newest known state.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::MessageFeed;
use crate::client::{RecordingOrchestrator, RtmpTarget};
use crate::error::Result;
use crate::media::FlvFileSink;
use crate::presence::model::MODEL_LEVEL;
use crate::presence::{notification_queue, ModelState, Notifications, PresenceMap, PresenceTracker};
use crate::session::RecordingReport;

/// Watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Capacity of the change event queue
    pub queue_capacity: usize,

    /// Account level tracked
    pub level: i32,

    /// Pause after a failed session before checking again
    pub retry_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            level: MODEL_LEVEL,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl WatcherConfig {
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Runs one recording session for a broadcaster and waits for it to end
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, model: &ModelState) -> Result<RecordingReport>;
}

/// Records each session to a fresh `<name>_<unix time>.flv` file
pub struct FileLauncher {
    orchestrator: RecordingOrchestrator,
    token: String,
    output_dir: PathBuf,
}

impl FileLauncher {
    pub fn new(
        orchestrator: RecordingOrchestrator,
        token: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            orchestrator,
            token: token.into(),
            output_dir: output_dir.into(),
        }
    }

    fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.flv", name, Utc::now().timestamp()))
    }
}

#[async_trait]
impl SessionLauncher for FileLauncher {
    async fn launch(&self, model: &ModelState) -> Result<RecordingReport> {
        let target = RtmpTarget::resolve(model, self.orchestrator.config());
        let path = self.output_path(&model.name);
        let sink = FlvFileSink::create(&path)?;

        tracing::info!(model = %model.name, path = %path.display(), "Recording to file");
        self.orchestrator
            .record(&target, &self.token, Some(Box::new(sink)))
            .await
    }
}

/// Follows the presence feed and launches sessions for one broadcaster
pub struct Watcher {
    config: WatcherConfig,
    launcher: Arc<dyn SessionLauncher>,
}

impl Watcher {
    pub fn new(config: WatcherConfig, launcher: Arc<dyn SessionLauncher>) -> Self {
        Self { config, launcher }
    }

    /// Run until the feed ends and the last session finished
    ///
    /// The presence map and queue live for the duration of the call.
    pub async fn run<F: MessageFeed + ?Sized>(&self, feed: &mut F, target: &str) -> Result<()> {
        let map = Arc::new(PresenceMap::new());
        let (queue, notifications) = notification_queue(self.config.queue_capacity);
        let tracker = PresenceTracker::new(map.clone(), queue, self.config.level);

        tracing::info!(model = %target, "Watching");

        // Dropping the tracker closes the queue, which lets the consumer drain
        // and return
        let produce = async move {
            let result = tracker.run(feed).await;
            drop(tracker);
            result
        };
        let consume = self.consume(&map, notifications, target);

        let (produced, consumed) = tokio::join!(produce, consume);
        produced.and(consumed)
    }

    async fn consume(
        &self,
        map: &PresenceMap,
        mut notifications: Notifications,
        target: &str,
    ) -> Result<()> {
        while let Some(event) = notifications.recv().await {
            if event.name != target {
                continue;
            }
            tracing::info!(model = %event.name, status = event.status(), "Target changed state");

            while let Some(current) = map.get(event.uid).await {
                if !current.is_recordable() {
                    tracing::debug!(model = %current.name, status = current.status(), "Not recordable");
                    break;
                }

                match self.launcher.launch(&current).await {
                    Ok(report) => {
                        tracing::info!(
                            model = %current.name,
                            outcome = ?report.outcome,
                            bytes = report.bytes_received,
                            "Session finished"
                        );
                    }
                    Err(e) => {
                        if e.is_session_local() {
                            tracing::warn!(model = %current.name, error = %e, "Session failed");
                        } else {
                            tracing::error!(model = %current.name, error = %e, "Session failed");
                        }
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Ok(())
    }
}
