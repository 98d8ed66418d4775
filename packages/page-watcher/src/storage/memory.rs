//! In-memory state store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::traits::StateStore;
use crate::types::WatchState;

/// Keeps the state in process memory; lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<Option<WatchState>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: WatchState) -> Self {
        Self {
            state: RwLock::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Current state without going through the trait.
    pub fn snapshot(&self) -> Option<WatchState> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of successful saves
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> StorageResult<Option<WatchState>> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &WatchState) -> StorageResult<()> {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
