//! Latest presence snapshot per broadcaster

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::model::ModelState;

/// uid → latest snapshot
///
/// A missing entry means the broadcaster was never observed, not that they
/// are offline. One writer (the tracker), any number of readers.
#[derive(Debug, Default)]
pub struct PresenceMap {
    models: RwLock<HashMap<u64, Arc<ModelState>>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, uid: u64) -> Option<Arc<ModelState>> {
        self.models.read().await.get(&uid).cloned()
    }

    /// Store a snapshot and return the one it replaced, under one write lock
    pub async fn replace(&self, state: Arc<ModelState>) -> Option<Arc<ModelState>> {
        self.models.write().await.insert(state.uid, state)
    }

    pub async fn len(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.models.read().await.is_empty()
    }
}
