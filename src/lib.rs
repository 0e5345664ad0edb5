//! TiddlyAce: edit TiddlySpace tiddlers in a tabbed code editor
//!
//! The library is the client core. A host UI supplies editor surfaces through
//! [`SurfaceHost`], and everything else (the tiddler store, the TiddlyWeb
//! client, pending edits, notices, the refresh loop) lives here.

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod languages;
pub mod notice;
pub mod refresh;
pub mod session;
pub mod store;
pub mod surface;
pub mod tiddlyweb;
pub mod types;
pub mod workbench;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::time::Duration;

pub use config::Config;
pub use directory::{Directory, DirectoryEntry};
pub use error::{Error, StoreError};
pub use languages::{Language, Languages};
pub use store::Store;
pub use surface::{EditorSurface, MemoryHost, SurfaceHost};
pub use tiddlyweb::{Backend, HttpBackend};
pub use types::{Bag, Space, Tiddler};
pub use workbench::{Opened, SaveOutcome, Workbench, WorkbenchOptions};

/// How often the headless client reports what it sees
const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Build a store from `config`
pub fn connect(config: &Config) -> Result<Store<HttpBackend>, Error> {
    let backend = HttpBackend::new(&config.server_url, config.request_timeout())?;
    let cache_path = config.resolved_cache_path();
    match &cache_path {
        Some(path) => tracing::info!("Pending edits cached at {:?}", path),
        None => tracing::warn!("No data directory, pending edits will not survive a restart"),
    }
    let store = Store::new(backend, cache::PendingCache::new(cache_path));
    Ok(match &config.recipe {
        Some(recipe) => store.with_recipe(recipe),
        None => store,
    })
}

/// Run the headless client until ctrl-c: keep the store in sync and log the
/// directory and notices as they change.
pub fn run(config_path: Option<PathBuf>) -> Result<(), Error> {
    let config = match config_path.or_else(Config::default_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    tracing::info!("Connecting to {}", config.server_url);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::Runtime)?;

    runtime.block_on(async move {
        let store = connect(&config)?;
        let workbench = Workbench::new(store, MemoryHost::default(), WorkbenchOptions::from(&config));
        let refresh = workbench.start_refresh();
        let mut notices = workbench.notices().subscribe();
        let mut report = tokio::time::interval(REPORT_INTERVAL);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down after {} refresh cycle(s)", refresh.cycles());
                    break;
                }
                changed = notices.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = report.tick() => report_directory(&workbench),
            }
        }

        let pending = workbench.store().pending_count();
        if pending > 0 {
            tracing::warn!("{} unsaved tiddler(s) kept in the pending cache", pending);
        }
        Ok(())
    })
}

fn report_directory<B: Backend, H: SurfaceHost>(workbench: &Workbench<B, H>) {
    let Some(directory) = workbench.directory() else {
        tracing::info!("Waiting for the server to report a space");
        return;
    };
    tracing::info!("{} tiddler(s) in the directory", directory.len());
    for entry in directory.listing() {
        tracing::debug!(
            "  {} [{}] {}{}",
            entry.title,
            entry.language,
            entry.bag,
            if entry.read_only { " (read-only)" } else { "" }
        );
    }
}
