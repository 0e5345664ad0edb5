//! Edit sessions
//!
//! An `EditSession` ties one editor surface to one tiddler title. Local edits
//! flow into the store's pending set; server changes flow back into the
//! surface.
//!
//! Server changes win unconditionally: when a newer revision arrives, the
//! visible text is replaced and any unsaved edit for the title is discarded.
//! The user is told afterwards through a notice.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::events::{EventKind, StoreEvent, Subscription, SubscriptionId};
use crate::languages::Language;
use crate::notice::Notices;
use crate::store::Store;
use crate::surface::{with_surface, SharedSurface, PLAIN_TEXT_MODE};
use crate::tiddlyweb::Backend;
use crate::types::Tiddler;

pub struct EditSession {
    title: String,
    language: Language,
    surface: SharedSurface,
    read_only: bool,
    subscription_id: SubscriptionId,
    watcher: JoinHandle<()>,
}

impl EditSession {
    /// Load `tiddler` into `surface` and start following server changes for `title`
    pub fn start<B: Backend>(
        store: Arc<Store<B>>,
        notices: Notices,
        surface: SharedSurface,
        language: Language,
        title: &str,
        tiddler: Option<&Tiddler>,
    ) -> Self {
        let read_only = tiddler.is_some_and(|t| !t.is_writable());
        let text = tiddler.map(Tiddler::text_or_empty).unwrap_or("");

        with_surface(&surface, |s| {
            if let Err(e) = s.set_mode(language.mode_name()) {
                tracing::debug!("{}, using plain text for '{}'", e, title);
                let _ = s.set_mode(PLAIN_TEXT_MODE);
            }
            s.set_value(text);
            s.set_read_only(read_only);
            s.goto_line(0);
        });

        let subscription = store.subscribe(EventKind::Tiddler, Some(title));
        let subscription_id = subscription.id();
        let watcher = tokio::spawn(follow_server_changes(
            store,
            notices,
            surface.clone(),
            title.to_string(),
            subscription,
        ));

        Self {
            title: title.to_string(),
            language,
            surface,
            read_only,
            subscription_id,
            watcher,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    /// Record new surface text as the pending edit. Only `text` changes; every other
    /// field is copied from the pending or cached tiddler.
    pub fn apply_local_edit<B: Backend>(&self, store: &Store<B>, text: &str) -> bool {
        if self.read_only {
            tracing::debug!("Ignoring edit to read-only tiddler '{}'", self.title);
            return false;
        }
        with_surface(&self.surface, |_| {
            let mut tiddler = store
                .get_cached(&self.title)
                .unwrap_or_else(|| Tiddler::new(self.title.as_str()));
            tiddler.text = Some(text.to_string());
            store.add_tiddler(tiddler, true);
        });
        true
    }

    /// Stop following server changes. Pending edits are left alone.
    pub fn shutdown<B: Backend>(self, store: &Store<B>) {
        self.watcher.abort();
        store.unsubscribe(self.subscription_id);
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

async fn follow_server_changes<B: Backend>(
    store: Arc<Store<B>>,
    notices: Notices,
    surface: SharedSurface,
    title: String,
    mut subscription: Subscription,
) {
    while let Some(event) = subscription.recv().await {
        let StoreEvent::Tiddler(changed) = event else {
            continue;
        };
        // Local echoes have never been to the server
        if !changed.is_synced() {
            continue;
        }
        match store.fetch_from_server(&title).await {
            Ok(Some(fresh)) => {
                with_surface(&surface, |s| {
                    s.set_value(fresh.text_or_empty());
                    store.remove_pending(&title);
                });
                notices.show(format!("{} updated from server.", title));
            }
            Ok(None) => tracing::debug!("'{}' is gone from the server", title),
            Err(e) => tracing::warn!("Failed to fetch server copy of '{}': {}", title, e),
        }
    }
}
