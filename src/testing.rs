//! In-memory TiddlyWeb server used by the unit tests

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::StoreError;
use crate::tiddlyweb::Backend;
use crate::types::{ServerStatus, Space, StatusSpace, Tiddler};

#[derive(Default)]
struct MockState {
    tiddlers: BTreeMap<String, Tiddler>,
    bags: Vec<String>,
    space: Option<Space>,
    next_revision: u64,
    reject_saves: bool,
    rejected_titles: BTreeSet<String>,
    omit_revisions: bool,
    fail_requests: bool,
    list_calls: usize,
    in_flight: usize,
    max_in_flight: usize,
    puts: Vec<Tiddler>,
}

pub struct MockBackend {
    state: Mutex<MockState>,
    list_delay: Duration,
    put_delay: Duration,
}

impl MockBackend {
    /// A server hosting the "dev" space
    pub fn new() -> Self {
        let backend = Self::without_space();
        backend.set_space(Some(Space {
            name: "dev".into(),
            recipe: "dev_public".into(),
        }));
        backend.state.lock().unwrap().bags = vec![
            "dev_public".into(),
            "dev_private".into(),
            "system_public".into(),
        ];
        backend
    }

    pub fn without_space() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_revision: 1,
                ..Default::default()
            }),
            list_delay: Duration::ZERO,
            put_delay: Duration::ZERO,
        }
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = delay;
        self
    }

    pub fn set_space(&self, space: Option<Space>) {
        self.state.lock().unwrap().space = space;
    }

    /// Create or replace a tiddler server-side, returning its revision
    pub fn insert(&self, title: &str, text: &str, mime: &str, bag: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision;
        state.next_revision += 1;
        let tiddler = Tiddler {
            text: Some(text.to_string()),
            tiddler_type: mime.to_string(),
            bag: bag.to_string(),
            revision: Some(revision),
            ..Tiddler::new(title)
        };
        state.tiddlers.insert(title.to_string(), tiddler);
        revision
    }

    /// Simulate another user editing a tiddler
    pub fn set_text(&self, title: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        let revision = state.next_revision;
        state.next_revision += 1;
        if let Some(tiddler) = state.tiddlers.get_mut(title) {
            tiddler.text = Some(text.to_string());
            tiddler.revision = Some(revision);
        }
    }

    pub fn set_permissions(&self, title: &str, permissions: &[&str]) {
        let mut state = self.state.lock().unwrap();
        if let Some(tiddler) = state.tiddlers.get_mut(title) {
            tiddler.permissions = Some(permissions.iter().map(|p| p.to_string()).collect());
        }
    }

    pub fn reject_saves(&self, reject: bool) {
        self.state.lock().unwrap().reject_saves = reject;
    }

    /// Refuse PUTs for one title only
    pub fn reject_title(&self, title: &str) {
        self.state.lock().unwrap().rejected_titles.insert(title.to_string());
    }

    /// Answer PUTs without a revision, like a server that sends no usable Etag
    pub fn omit_revisions(&self, omit: bool) {
        self.state.lock().unwrap().omit_revisions = omit;
    }

    pub fn fail_requests(&self, fail: bool) {
        self.state.lock().unwrap().fail_requests = fail;
    }

    pub fn server_text(&self, title: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .tiddlers
            .get(title)
            .and_then(|t| t.text.clone())
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub fn puts(&self) -> Vec<Tiddler> {
        self.state.lock().unwrap().puts.clone()
    }

    fn unavailable(path: &str) -> StoreError {
        StoreError::Status {
            status: 503,
            url: format!("mock://{}", path),
        }
    }
}

impl Backend for MockBackend {
    async fn status(&self) -> Result<ServerStatus, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(ServerStatus {
            username: Some("tester".into()),
            space: state.space.as_ref().map(|s| StatusSpace {
                name: Some(s.name.clone()),
                recipe: Some(s.recipe.clone()),
            }),
        })
    }

    async fn list_tiddlers(&self, _recipe: &str) -> Result<Vec<Tiddler>, StoreError> {
        {
            let mut state = self.state.lock().unwrap();
            state.list_calls += 1;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        if state.fail_requests {
            return Err(Self::unavailable("tiddlers.json"));
        }
        Ok(state
            .tiddlers
            .values()
            .map(|t| Tiddler {
                text: None,
                ..t.clone()
            })
            .collect())
    }

    async fn get_tiddler(&self, _recipe: &str, title: &str) -> Result<Option<Tiddler>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_requests {
            return Err(Self::unavailable(title));
        }
        Ok(state.tiddlers.get(title).cloned())
    }

    async fn put_tiddler(&self, _recipe: &str, tiddler: &Tiddler) -> Result<Option<u64>, StoreError> {
        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.reject_saves || state.fail_requests || state.rejected_titles.contains(&tiddler.title) {
            return Err(Self::unavailable(&tiddler.title));
        }
        let revision = state.next_revision;
        state.next_revision += 1;
        let mut saved = tiddler.clone();
        saved.revision = Some(revision);
        saved.last_sync = None;
        state.puts.push(saved.clone());
        state.tiddlers.insert(saved.title.clone(), saved);
        Ok((!state.omit_revisions).then_some(revision))
    }

    async fn list_bags(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.lock().unwrap().bags.clone())
    }
}
