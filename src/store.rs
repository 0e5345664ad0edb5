//! Local tiddler store backed by a TiddlyWeb server
//!
//! The store owns three things:
//! - the last copy of every tiddler the server listed (skinny until fetched)
//! - the pending set: local edits not yet saved, keyed by title
//! - the event bus that tells sessions and the directory about changes
//!
//! Lookups prefer a pending edit over the server copy.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cache::{CacheSnapshot, PendingCache};
use crate::error::StoreError;
use crate::events::{EventBus, EventKind, StoreEvent, Subscription, SubscriptionId};
use crate::tiddlyweb::Backend;
use crate::types::{Bag, Space, Tiddler};

#[derive(Default)]
struct StoreState {
    tiddlers: HashMap<String, Tiddler>,
    pending: HashMap<String, Tiddler>,
    bags: BTreeMap<String, Bag>,
    space: Option<Space>,
}

pub struct Store<B> {
    backend: B,
    state: Mutex<StoreState>,
    events: EventBus,
    cache: PendingCache,
}

impl<B: Backend> Store<B> {
    pub fn new(backend: B, cache: PendingCache) -> Self {
        Self {
            backend,
            state: Mutex::new(StoreState::default()),
            events: EventBus::new(),
            cache,
        }
    }

    /// Pin the scope to a recipe instead of asking the server's `/status`
    pub fn with_recipe(self, recipe: &str) -> Self {
        self.lock().space = Some(Space::from_recipe(recipe));
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scope ───────────────────────────────────────────────────────────

    /// The current space, asking the server once if it has not been resolved
    pub async fn current_space(&self) -> Result<Option<Space>, StoreError> {
        if let Some(space) = self.space() {
            return Ok(Some(space));
        }
        let status = self.backend.status().await?;
        let space = status.space();
        if let Some(ref space) = space {
            tracing::info!("Resolved space '{}' (recipe {})", space.name, space.recipe);
            self.lock().space.get_or_insert_with(|| space.clone());
        }
        Ok(space)
    }

    pub fn space(&self) -> Option<Space> {
        self.lock().space.clone()
    }

    fn recipe(&self) -> Result<String, StoreError> {
        self.lock()
            .space
            .as_ref()
            .map(|s| s.recipe.clone())
            .ok_or(StoreError::NoScope)
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    pub fn subscribe(&self, kind: EventKind, title: Option<&str>) -> Subscription {
        self.events.subscribe(kind, title)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    // ── Tiddlers ────────────────────────────────────────────────────────

    /// Pending edit if there is one, otherwise the last server copy
    pub fn get_cached(&self, title: &str) -> Option<Tiddler> {
        let state = self.lock();
        state
            .pending
            .get(title)
            .or_else(|| state.tiddlers.get(title))
            .cloned()
    }

    /// Full tiddler, fetching its text from the server when only a skinny copy is held.
    ///
    /// `Ok(None)` means the server confirmed the tiddler does not exist.
    pub async fn get_tiddler(&self, title: &str) -> Result<Option<Tiddler>, StoreError> {
        {
            let state = self.lock();
            if let Some(t) = state.pending.get(title) {
                return Ok(Some(t.clone()));
            }
            if let Some(t) = state.tiddlers.get(title).filter(|t| t.text.is_some()) {
                return Ok(Some(t.clone()));
            }
        }
        self.fetch_from_server(title).await
    }

    /// Always go to the server, ignoring any pending edit. Updates the cached copy quietly.
    pub async fn fetch_from_server(&self, title: &str) -> Result<Option<Tiddler>, StoreError> {
        let recipe = self.recipe()?;
        let Some(mut tiddler) = self.backend.get_tiddler(&recipe, title).await? else {
            return Ok(None);
        };
        tiddler.last_sync = Some(Utc::now());
        self.lock()
            .tiddlers
            .insert(tiddler.title.clone(), tiddler.clone());
        Ok(Some(tiddler))
    }

    /// Add a tiddler locally. With `pending` it becomes the unsaved edit for its title.
    /// A pending tiddler is a local edit, so it never carries the server marker.
    pub fn add_tiddler(&self, mut tiddler: Tiddler, pending: bool) {
        let snapshot = {
            let mut state = self.lock();
            if pending {
                tiddler.last_sync = None;
                state.pending.insert(tiddler.title.clone(), tiddler.clone());
                self.cache.snapshot(&state.pending)
            } else {
                state.tiddlers.insert(tiddler.title.clone(), tiddler.clone());
                None
            }
        };
        self.persist(snapshot);
        self.events.publish(StoreEvent::Tiddler(tiddler));
    }

    /// Drop the unsaved edit for a title
    pub fn remove_pending(&self, title: &str) -> Option<Tiddler> {
        let (removed, snapshot) = {
            let mut state = self.lock();
            let removed = state.pending.remove(title);
            let snapshot = removed.as_ref().and_then(|_| self.cache.snapshot(&state.pending));
            (removed, snapshot)
        };
        self.persist(snapshot);
        removed
    }

    /// Write a pending-set snapshot once the state lock is released
    fn persist(&self, snapshot: Option<CacheSnapshot>) {
        if let Some(snapshot) = snapshot {
            self.cache.write(snapshot);
        }
    }

    pub fn pending(&self, title: &str) -> Option<Tiddler> {
        self.lock().pending.get(title).cloned()
    }

    pub fn has_pending(&self, title: &str) -> bool {
        self.lock().pending.contains_key(title)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Every known tiddler with pending edits layered over server copies, sorted by title
    pub fn tiddlers(&self) -> Vec<Tiddler> {
        let state = self.lock();
        let mut merged: BTreeMap<&str, &Tiddler> = state
            .tiddlers
            .iter()
            .map(|(title, t)| (title.as_str(), t))
            .collect();
        for (title, t) in &state.pending {
            merged.insert(title.as_str(), t);
        }
        merged.into_values().cloned().collect()
    }

    // ── Bags ────────────────────────────────────────────────────────────

    pub fn get_bag(&self, name: &str) -> Bag {
        self.lock()
            .bags
            .get(name)
            .cloned()
            .unwrap_or_else(|| Bag::new(name))
    }

    pub fn bags(&self) -> Vec<Bag> {
        self.lock().bags.values().cloned().collect()
    }

    // ── Server synchronization ──────────────────────────────────────────

    /// Re-list the recipe. Publishes an event for each tiddler that is new or has a new
    /// revision and returns how many there were.
    pub async fn refresh_tiddlers(&self) -> Result<usize, StoreError> {
        let recipe = self.recipe()?;
        let listed = self.backend.list_tiddlers(&recipe).await?;
        let now = Utc::now();

        let changed: Vec<Tiddler> = {
            let mut state = self.lock();
            let mut previous = std::mem::take(&mut state.tiddlers);
            let mut changed = Vec::new();
            for mut skinny in listed {
                match previous.remove(&skinny.title) {
                    Some(known) if known.revision == skinny.revision && skinny.revision.is_some() => {
                        state.tiddlers.insert(known.title.clone(), known);
                    }
                    _ => {
                        skinny.last_sync = Some(now);
                        changed.push(skinny.clone());
                        state.tiddlers.insert(skinny.title.clone(), skinny);
                    }
                }
            }
            changed
        };

        tracing::debug!("Refreshed recipe {}: {} changed", recipe, changed.len());
        let count = changed.len();
        for tiddler in changed {
            self.events.publish(StoreEvent::Tiddler(tiddler));
        }
        Ok(count)
    }

    /// Load the bag list, publishing an event for bags not seen before
    pub async fn refresh_bags(&self) -> Result<usize, StoreError> {
        let names = self.backend.list_bags().await?;
        let mut added = Vec::new();
        {
            let mut state = self.lock();
            for name in names {
                if state.bags.contains_key(&name) {
                    continue;
                }
                let bag = Bag::new(name);
                state.bags.insert(bag.name.clone(), bag.clone());
                added.push(bag);
            }
        }
        let count = added.len();
        for bag in added {
            self.events.publish(StoreEvent::Bag(bag));
        }
        Ok(count)
    }

    /// Restore pending edits from the on-disk cache that are not already pending
    pub fn retrieve_cached(&self) -> usize {
        let Some(cached) = self.cache.load() else {
            return 0;
        };
        let restored: Vec<Tiddler> = {
            let mut state = self.lock();
            // The pending set changed after the file was read
            if self.cache.generation() != cached.generation {
                return 0;
            }
            let restored: Vec<Tiddler> = cached
                .tiddlers
                .into_values()
                .filter(|t| !state.pending.contains_key(&t.title))
                .collect();
            for t in &restored {
                state.pending.insert(t.title.clone(), t.clone());
            }
            restored
        };
        if !restored.is_empty() {
            tracing::info!("Restored {} cached pending tiddler(s)", restored.len());
        }
        let count = restored.len();
        for t in restored {
            self.events.publish(StoreEvent::Tiddler(t));
        }
        count
    }

    /// Save every pending tiddler. Saved ones leave the pending set; failed ones stay.
    pub async fn save(&self) -> Result<usize, StoreError> {
        let to_save: Vec<Tiddler> = self.lock().pending.values().cloned().collect();
        if to_save.is_empty() {
            return Err(StoreError::NothingToSave);
        }
        let recipe = self.recipe().unwrap_or_default();

        let mut saved = 0;
        let mut failed = Vec::new();
        for tiddler in to_save {
            match self.backend.put_tiddler(&recipe, &tiddler).await {
                Ok(revision) => {
                    let title = tiddler.title.clone();
                    let snapshot = {
                        let mut state = self.lock();
                        // An edit made while the request was in flight stays pending
                        let unchanged = state.pending.get(&title) == Some(&tiddler);
                        if unchanged {
                            state.pending.remove(&title);
                        }
                        let mut stored = tiddler;
                        stored.revision = revision;
                        stored.last_sync = Some(Utc::now());
                        state.tiddlers.insert(title.clone(), stored);
                        unchanged.then(|| self.cache.snapshot(&state.pending)).flatten()
                    };
                    self.persist(snapshot);
                    saved += 1;

                    // Without a revision the next listing would look like someone else's change
                    if revision.is_none() {
                        if let Err(e) = self.fetch_from_server(&title).await {
                            tracing::warn!("Failed to read back revision of '{}': {}", title, e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to save '{}': {}", tiddler.title, e);
                    failed.push(tiddler.title);
                }
            }
        }

        if failed.is_empty() {
            tracing::info!("Saved {} tiddler(s)", saved);
            Ok(saved)
        } else {
            failed.sort();
            Err(StoreError::Save { failed })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> Store<MockBackend> {
        Store::new(MockBackend::new(), PendingCache::in_memory())
    }

    async fn resolved_store() -> Store<MockBackend> {
        let store = store();
        store.current_space().await.unwrap();
        store
    }

    fn add_pending(store: &Store<MockBackend>, title: &str) {
        let mut t = Tiddler::new(title);
        t.bag = "dev_public".into();
        t.text = Some(format!("text of {}", title));
        store.add_tiddler(t, true);
    }

    fn titles(sub: &mut Subscription) -> Vec<(String, bool)> {
        std::iter::from_fn(|| sub.try_recv())
            .filter_map(|e| match e {
                StoreEvent::Tiddler(t) => Some((t.title.clone(), t.is_synced())),
                StoreEvent::Bag(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_current_space_resolves_once() {
        let store = store();
        let space = store.current_space().await.unwrap().unwrap();
        assert_eq!(space.name, "dev");

        store.backend().set_space(None);
        assert_eq!(store.current_space().await.unwrap(), Some(space));
    }

    #[tokio::test]
    async fn test_recipe_override() {
        let store = Store::new(MockBackend::without_space(), PendingCache::in_memory())
            .with_recipe("notes_public");
        let space = store.current_space().await.unwrap().unwrap();
        assert_eq!(space.name, "notes");
        assert_eq!(space.recipe, "notes_public");
    }

    #[tokio::test]
    async fn test_refresh_requires_scope() {
        let store = Store::new(MockBackend::without_space(), PendingCache::in_memory());
        assert!(store.current_space().await.unwrap().is_none());
        assert!(matches!(store.refresh_tiddlers().await, Err(StoreError::NoScope)));
    }

    #[tokio::test]
    async fn test_get_tiddler_fetches_fat_copy() {
        let store = resolved_store().await;
        store.backend().insert("foo", "var x;", "text/javascript", "dev_public");
        store.refresh_tiddlers().await.unwrap();
        assert_eq!(store.get_cached("foo").unwrap().text, None);

        let fat = store.get_tiddler("foo").await.unwrap().unwrap();
        assert_eq!(fat.text.as_deref(), Some("var x;"));
        assert!(fat.is_synced());
        assert_eq!(store.get_cached("foo").unwrap().text.as_deref(), Some("var x;"));

        assert!(store.get_tiddler("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_tiddler_network_failure_is_error() {
        let store = resolved_store().await;
        store.backend().fail_requests(true);
        assert!(store.get_tiddler("foo").await.is_err());
    }

    #[tokio::test]
    async fn test_pending_wins_over_server_copy() {
        let store = resolved_store().await;
        store.backend().insert("foo", "server", "", "dev_public");
        store.get_tiddler("foo").await.unwrap();

        let mut local = store.get_cached("foo").unwrap();
        local.text = Some("local".into());
        store.add_tiddler(local, true);

        assert!(store.has_pending("foo"));
        assert_eq!(store.get_tiddler("foo").await.unwrap().unwrap().text.as_deref(), Some("local"));
        assert_eq!(
            store.fetch_from_server("foo").await.unwrap().unwrap().text.as_deref(),
            Some("server")
        );
        assert_eq!(store.tiddlers().len(), 1);
        assert_eq!(store.tiddlers()[0].text.as_deref(), Some("local"));
    }

    #[tokio::test]
    async fn test_refresh_publishes_only_changes() {
        let store = resolved_store().await;
        let mut sub = store.subscribe(EventKind::Tiddler, None);
        store.backend().insert("a", "1", "", "dev_public");
        store.backend().insert("b", "2", "", "dev_public");

        assert_eq!(store.refresh_tiddlers().await.unwrap(), 2);
        assert_eq!(titles(&mut sub), vec![("a".to_string(), true), ("b".to_string(), true)]);

        assert_eq!(store.refresh_tiddlers().await.unwrap(), 0);
        assert!(titles(&mut sub).is_empty());

        store.backend().set_text("b", "changed");
        assert_eq!(store.refresh_tiddlers().await.unwrap(), 1);
        assert_eq!(titles(&mut sub), vec![("b".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_local_add_is_not_synced() {
        let store = resolved_store().await;
        let mut sub = store.subscribe(EventKind::Tiddler, Some("new"));
        store.add_tiddler(Tiddler::new("new"), true);
        assert_eq!(titles(&mut sub), vec![("new".to_string(), false)]);
    }

    #[tokio::test]
    async fn test_save_nothing() {
        let store = resolved_store().await;
        store.backend().insert("a", "1", "", "dev_public");
        store.refresh_tiddlers().await.unwrap();
        let before = store.tiddlers();

        assert!(matches!(store.save().await, Err(StoreError::NothingToSave)));
        assert_eq!(store.tiddlers(), before);
        assert!(store.backend().puts().is_empty());
    }

    #[tokio::test]
    async fn test_save_success_clears_pending() {
        let store = resolved_store().await;
        for title in ["a", "b"] {
            let mut t = Tiddler::new(title);
            t.bag = "dev_public".into();
            t.text = Some(format!("text of {}", title));
            store.add_tiddler(t, true);
        }
        let mut sub = store.subscribe(EventKind::Tiddler, None);

        assert_eq!(store.save().await.unwrap(), 2);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.backend().server_text("a").as_deref(), Some("text of a"));
        assert!(store.get_cached("b").unwrap().is_synced());
        // Saving does not echo back as a server change
        assert!(titles(&mut sub).is_empty());
        assert_eq!(store.refresh_tiddlers().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_rejected_keeps_pending() {
        let store = resolved_store().await;
        let mut t = Tiddler::new("a");
        t.text = Some("draft".into());
        store.add_tiddler(t.clone(), true);
        store.backend().reject_saves(true);

        match store.save().await {
            Err(StoreError::Save { failed }) => assert_eq!(failed, vec!["a"]),
            other => panic!("unexpected save result: {:?}", other),
        }
        assert_eq!(store.pending("a"), Some(t));

        store.backend().reject_saves(false);
        assert_eq!(store.save().await.unwrap(), 1);
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_cached_restores_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");

        let first = Store::new(MockBackend::new(), PendingCache::new(Some(path.clone())));
        let mut t = Tiddler::new("draft");
        t.text = Some("unsaved".into());
        first.add_tiddler(t, true);
        drop(first);

        let second = Store::new(MockBackend::new(), PendingCache::new(Some(path)));
        let mut sub = second.subscribe(EventKind::Tiddler, None);
        assert_eq!(second.retrieve_cached(), 1);
        assert_eq!(second.pending("draft").unwrap().text.as_deref(), Some("unsaved"));
        assert_eq!(titles(&mut sub), vec![("draft".to_string(), false)]);
        assert_eq!(second.retrieve_cached(), 0);

        second.remove_pending("draft");
        assert_eq!(second.retrieve_cached(), 0);
    }

    #[tokio::test]
    async fn test_refresh_bags() {
        let store = resolved_store().await;
        let mut sub = store.subscribe(EventKind::Bag, None);
        assert_eq!(store.refresh_bags().await.unwrap(), 3);
        assert_eq!(store.refresh_bags().await.unwrap(), 0);
        assert_eq!(std::iter::from_fn(|| sub.try_recv()).count(), 3);
        assert_eq!(store.get_bag("dev_public").space_name(), "dev");
        assert_eq!(store.bags().len(), 3);
    }

    #[tokio::test]
    async fn test_save_partial_failure() {
        let store = resolved_store().await;
        add_pending(&store, "a");
        add_pending(&store, "b");
        store.backend().reject_title("b");

        match store.save().await {
            Err(StoreError::Save { failed }) => assert_eq!(failed, vec!["b"]),
            other => panic!("unexpected save result: {:?}", other),
        }
        assert!(!store.has_pending("a"));
        assert_eq!(store.pending("b").unwrap().text.as_deref(), Some("text of b"));
        assert_eq!(store.backend().server_text("a").as_deref(), Some("text of a"));
        assert!(store.backend().server_text("b").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_saved_edit_not_restored_while_saving() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new().with_put_delay(Duration::from_millis(500));
        let store = Arc::new(Store::new(
            backend,
            PendingCache::new(Some(dir.path().join("pending.json"))),
        ));
        store.current_space().await.unwrap();
        add_pending(&store, "a");
        add_pending(&store, "b");

        let saving = tokio::spawn({
            let store = store.clone();
            async move { store.save().await }
        });
        // First PUT done, second still in flight
        tokio::time::sleep(Duration::from_millis(750)).await;
        assert_eq!(store.pending_count(), 1);
        assert_eq!(store.retrieve_cached(), 0);

        assert_eq!(saving.await.unwrap().unwrap(), 2);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.retrieve_cached(), 0);
    }

    #[tokio::test]
    async fn test_save_without_revision_is_not_a_server_change() {
        let store = resolved_store().await;
        store.backend().omit_revisions(true);
        add_pending(&store, "a.css");
        let mut sub = store.subscribe(EventKind::Tiddler, None);

        assert_eq!(store.save().await.unwrap(), 1);
        assert!(store.get_cached("a.css").unwrap().revision.is_some());
        assert_eq!(store.refresh_tiddlers().await.unwrap(), 0);
        assert!(titles(&mut sub).is_empty());
    }
}
