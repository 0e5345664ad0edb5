//! Transient status messages
//!
//! The host shows whatever is currently published on the watch channel. A
//! message clears itself after the configured timeout unless a newer one has
//! replaced it in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone)]
pub struct Notices {
    tx: Arc<watch::Sender<Option<String>>>,
    generation: Arc<AtomicU64>,
    timeout: Duration,
}

impl Notices {
    pub fn new(timeout: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    /// Show a message. Must be called from within a tokio runtime.
    pub fn show(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.tx.send_replace(Some(message));

        let tx = self.tx.clone();
        let current = self.generation.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if current.load(Ordering::Acquire) == generation {
                tx.send_replace(None);
            }
        });
    }

    pub fn current(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}
