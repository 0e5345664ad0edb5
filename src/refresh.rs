//! Periodic refresh from the server
//!
//! Once the store's space resolves, the loop loads the bag list, then re-lists
//! the recipe and restores cached pending edits on a fixed period. A slow
//! fetch pushes the next cycle back; cycles never overlap and none are
//! skipped. The loop runs until its `RefreshLoop` is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::Store;
use crate::tiddlyweb::Backend;

/// Read-only view of a running loop
#[derive(Clone, Debug)]
pub struct RefreshHandle {
    frequency: Duration,
    cycles: Arc<AtomicU64>,
}

impl RefreshHandle {
    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    /// Completed refresh passes, including the initial one
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }
}

pub struct RefreshLoop {
    handle: RefreshHandle,
    task: JoinHandle<()>,
}

impl RefreshLoop {
    pub fn start<B: Backend>(store: Arc<Store<B>>, frequency: Duration) -> Self {
        let handle = RefreshHandle {
            frequency,
            cycles: Arc::new(AtomicU64::new(0)),
        };
        let task = tokio::spawn(run(store, handle.clone()));
        Self { handle, task }
    }

    pub fn handle(&self) -> RefreshHandle {
        self.handle.clone()
    }
}

impl Drop for RefreshLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<B: Backend>(store: Arc<Store<B>>, handle: RefreshHandle) {
    let frequency = handle.frequency;

    // Fetching against an unresolved scope would list nothing
    loop {
        match store.current_space().await {
            Ok(Some(_)) => break,
            Ok(None) => tracing::warn!("Server has no space yet, retrying in {:?}", frequency),
            Err(e) => tracing::warn!("Failed to resolve space: {} (retrying in {:?})", e, frequency),
        }
        tokio::time::sleep(frequency).await;
    }

    if let Err(e) = store.refresh_bags().await {
        tracing::warn!("Failed to load bags: {}", e);
    }

    // First tick completes immediately and doubles as the initial load
    let mut ticker = tokio::time::interval(frequency);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match store.refresh_tiddlers().await {
            Ok(0) => {}
            Ok(changed) => tracing::debug!("{} tiddler(s) changed on the server", changed),
            Err(e) => tracing::warn!("Refresh failed: {}", e),
        }
        store.retrieve_cached();
        handle.cycles.fetch_add(1, Ordering::AcqRel);
    }
}
