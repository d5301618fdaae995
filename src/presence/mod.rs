//! Broadcaster presence tracking
//!
//! The tracker reads the chat feed, keeps the latest snapshot of every
//! broadcaster in a `PresenceMap` and queues an event whenever a
//! broadcaster's visibility changes.

pub mod extract;
pub mod map;
pub mod model;
pub mod tracker;

pub use extract::{extract_model, Extraction};
pub use map::PresenceMap;
pub use model::ModelState;
pub use tracker::{notification_queue, NotificationQueue, Notifications, PresenceTracker};
