//! Presence tracker: raw feed in, edge-triggered change events out

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::extract::{extract_model, Extraction};
use super::map::PresenceMap;
use super::model::ModelState;
use crate::chat::MessageFeed;
use crate::error::{Error, Result};

/// Create a bounded notification queue
pub fn notification_queue(capacity: usize) -> (NotificationQueue, Notifications) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        NotificationQueue {
            tx,
            overflows: Arc::new(AtomicU64::new(0)),
        },
        Notifications { rx },
    )
}

/// Producer half of the change event queue; never blocks
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Arc<ModelState>>,
    overflows: Arc<AtomicU64>,
}

impl NotificationQueue {
    pub fn push(&self, state: Arc<ModelState>) -> Result<()> {
        match self.tx.try_send(state) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.overflows.fetch_add(1, Ordering::Relaxed);
                Err(Error::QueueOverflow)
            }
            Err(TrySendError::Closed(_)) => Err(Error::Closed),
        }
    }

    /// Events dropped because the queue was full
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

/// Consumer half of the change event queue
#[derive(Debug)]
pub struct Notifications {
    rx: mpsc::Receiver<Arc<ModelState>>,
}

impl Notifications {
    pub async fn recv(&mut self) -> Option<Arc<ModelState>> {
        self.rx.recv().await
    }
}

/// Turns presence lines into visibility change events
pub struct PresenceTracker {
    map: Arc<PresenceMap>,
    queue: NotificationQueue,
    level: i32,
}

impl PresenceTracker {
    /// Track accounts of the given level (broadcasters are level 4)
    pub fn new(map: Arc<PresenceMap>, queue: NotificationQueue, level: i32) -> Self {
        Self { map, queue, level }
    }

    pub fn map(&self) -> &Arc<PresenceMap> {
        &self.map
    }

    pub fn overflow_count(&self) -> u64 {
        self.queue.overflow_count()
    }

    /// Process one raw line; returns whether a change event was emitted
    ///
    /// The snapshot is stored before the event is queued, so whoever reads
    /// the event finds the map at least as new as the event.
    pub async fn handle_message(&self, raw: &str) -> Result<bool> {
        let state = match extract_model(raw)? {
            Extraction::Model(state) if state.level == self.level => Arc::new(state),
            _ => return Ok(false),
        };

        let previous = self.map.replace(state.clone()).await;
        let changed = previous.map_or(true, |p| p.visibility != state.visibility);
        if !changed {
            return Ok(false);
        }

        tracing::info!(
            model = %state.name,
            uid = state.uid,
            status = state.status(),
            "Model state changed"
        );
        self.queue.push(state)?;
        Ok(true)
    }

    /// Consume the feed until it ends
    ///
    /// Bad payloads and queue overflows are logged and skipped; feed errors
    /// end the loop.
    pub async fn run<F: MessageFeed + ?Sized>(&self, feed: &mut F) -> Result<()> {
        while let Some(raw) = feed.next_message().await? {
            match self.handle_message(&raw).await {
                Ok(_) => {}
                Err(Error::QueueOverflow) => {
                    tracing::warn!(
                        overflows = self.queue.overflow_count(),
                        "Notification queue full, event dropped"
                    );
                }
                Err(e @ Error::Extraction(_)) => {
                    tracing::debug!(error = %e, "Skipping undecodable message");
                }
                Err(e) => return Err(e),
            }
        }

        let tracked = self.map.len().await;
        tracing::info!(tracked, "Presence feed ended");
        Ok(())
    }
}
