//! The workbench: open tiddlers, edit them, save them
//!
//! `Workbench` owns everything the host UI talks to: the content-type
//! registry, the map of open sessions, the notices channel, the save guard
//! and the refresh loop. Built once at startup and shared by reference.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::Config;
use crate::directory::Directory;
use crate::error::{Error, StoreError};
use crate::languages::{Language, Languages};
use crate::notice::Notices;
use crate::refresh::{RefreshHandle, RefreshLoop};
use crate::session::EditSession;
use crate::store::Store;
use crate::surface::SurfaceHost;
use crate::tiddlyweb::Backend;
use crate::types::Tiddler;

#[derive(Clone, Debug)]
pub struct WorkbenchOptions {
    /// Tag new tiddlers with the registry's default tags instead of setting their type
    pub tiddlywiki_mode: bool,
    pub refresh_interval: Duration,
    pub notice_timeout: Duration,
}

impl Default for WorkbenchOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for WorkbenchOptions {
    fn from(config: &Config) -> Self {
        Self {
            tiddlywiki_mode: config.tiddlywiki_mode,
            refresh_interval: config.refresh_interval(),
            notice_timeout: config.notice_timeout(),
        }
    }
}

/// What `Workbench::open` did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opened {
    /// Already open; its tab was brought to the front
    Focused,
    /// Opened an existing tiddler
    Loaded,
    /// The server had no such tiddler, so a new pending one was created
    Created,
}

/// Result of a completed save
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(usize),
    Failed,
    NothingToSave,
}

impl SaveOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            SaveOutcome::Saved(_) => "Saved all Tiddlers",
            SaveOutcome::Failed => "There was a problem saving. Please try again",
            SaveOutcome::NothingToSave => "There is nothing to save",
        }
    }
}

/// Held while a save is in flight; released on drop
struct SaveGuard<'a>(&'a AtomicBool);

impl<'a> SaveGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Workbench<B: Backend, H: SurfaceHost> {
    store: Arc<Store<B>>,
    host: Arc<H>,
    languages: Languages,
    notices: Notices,
    sessions: Mutex<HashMap<String, EditSession>>,
    saving: AtomicBool,
    options: WorkbenchOptions,
    refresh: Mutex<Option<RefreshLoop>>,
}

impl<B: Backend, H: SurfaceHost> Workbench<B, H> {
    pub fn new(store: Store<B>, host: H, options: WorkbenchOptions) -> Self {
        Self {
            store: Arc::new(store),
            host: Arc::new(host),
            languages: Languages::default(),
            notices: Notices::new(options.notice_timeout),
            sessions: Mutex::new(HashMap::new()),
            saving: AtomicBool::new(false),
            options,
            refresh: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<Store<B>> {
        &self.store
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn languages(&self) -> &Languages {
        &self.languages
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, EditSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Refresh ─────────────────────────────────────────────────────────

    /// Start the refresh loop if it is not running yet
    pub fn start_refresh(&self) -> RefreshHandle {
        let mut refresh = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        refresh
            .get_or_insert_with(|| {
                tracing::info!("Refreshing every {:?}", self.options.refresh_interval);
                RefreshLoop::start(self.store.clone(), self.options.refresh_interval)
            })
            .handle()
    }

    pub fn refresh_loop(&self) -> Option<RefreshHandle> {
        self.refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(RefreshLoop::handle)
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Open `title` for editing, creating it in `bag` if the server does not have it
    pub async fn open(&self, language: Language, title: &str, bag: &str) -> Result<Opened, Error> {
        if title.trim().is_empty() {
            return Err(Error::EmptyTitle);
        }
        if self.sessions().contains_key(title) {
            self.host.focus(title);
            return Ok(Opened::Focused);
        }

        let existing = match self.store.get_tiddler(title).await {
            Ok(tiddler) => tiddler,
            Err(e) => {
                self.notices.show(format!("Could not load {}: {}", title, e));
                return Err(e.into());
            }
        };
        let created = existing.is_none();
        if created {
            let tiddler = self.new_tiddler(language, title, bag);
            tracing::info!("Creating '{}' in bag {}", title, tiddler.bag);
            self.store.add_tiddler(tiddler, true);
        }

        let mut sessions = self.sessions();
        // Another open for the same title may have finished while we were fetching
        if sessions.contains_key(title) {
            self.host.focus(title);
            return Ok(Opened::Focused);
        }
        let tiddler = self.store.get_cached(title);
        let language = self.languages.classify(tiddler.as_ref());
        let surface = self.host.create(language, title);
        let session = EditSession::start(
            self.store.clone(),
            self.notices.clone(),
            surface,
            language,
            title,
            tiddler.as_ref(),
        );
        sessions.insert(title.to_string(), session);
        drop(sessions);
        self.host.focus(title);

        Ok(if created { Opened::Created } else { Opened::Loaded })
    }

    fn new_tiddler(&self, language: Language, title: &str, bag: &str) -> Tiddler {
        let mut tiddler = Tiddler::new(title);
        tiddler.bag = self.store.get_bag(bag).name;
        if self.options.tiddlywiki_mode {
            tiddler.merge_tags(self.languages.default_tags(language));
        } else {
            tiddler.tiddler_type = self.languages.mime_type(language).to_string();
        }
        tiddler
    }

    /// The "new tiddler" action: open `name` in the current space's public bag.
    /// Returns `Ok(None)` when no space could be resolved.
    pub async fn create_tiddler(&self, language: Language, name: &str) -> Result<Option<Opened>, Error> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::EmptyTitle);
        }
        let Some(space) = self.store.current_space().await? else {
            tracing::warn!("No space resolved, not creating '{}'", name);
            return Ok(None);
        };
        self.open(language, name, &space.public_bag()).await.map(Some)
    }

    /// Feed new surface text for an open tiddler into the pending set
    pub fn text_changed(&self, title: &str, text: &str) -> bool {
        match self.sessions().get(title) {
            Some(session) => session.apply_local_edit(&self.store, text),
            None => {
                tracing::debug!("Edit for '{}' which is not open", title);
                false
            }
        }
    }

    /// Close the tab for `title`. Unsaved edits stay pending.
    pub fn close(&self, title: &str) -> bool {
        let Some(session) = self.sessions().remove(title) else {
            return false;
        };
        session.shutdown(&self.store);
        self.host.close(title);
        true
    }

    pub fn is_open(&self, title: &str) -> bool {
        self.sessions().contains_key(title)
    }

    /// Titles with an open session, sorted
    pub fn open_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self.sessions().keys().cloned().collect();
        titles.sort();
        titles
    }

    pub fn session_language(&self, title: &str) -> Option<Language> {
        self.sessions().get(title).map(EditSession::language)
    }

    // ── Save ────────────────────────────────────────────────────────────

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    /// Save every pending tiddler. Rejected with `Error::SaveInProgress` while
    /// another save is running.
    pub async fn save(&self) -> Result<SaveOutcome, Error> {
        let _guard = SaveGuard::acquire(&self.saving).ok_or(Error::SaveInProgress)?;
        self.notices.show("Saving Tiddlers");

        let outcome = match self.store.save().await {
            Ok(count) => SaveOutcome::Saved(count),
            Err(StoreError::NothingToSave) => SaveOutcome::NothingToSave,
            Err(e) => {
                tracing::warn!("Save failed: {}", e);
                SaveOutcome::Failed
            }
        };
        self.notices.show(outcome.message());
        Ok(outcome)
    }

    // ── Directory ───────────────────────────────────────────────────────

    /// Sections for the current space, or None before the space resolves
    pub fn directory(&self) -> Option<Directory> {
        let space = self.store.space()?;
        Some(Directory::build(&self.store.tiddlers(), &space.name, &self.languages))
    }
}
