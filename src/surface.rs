//! Editing-surface seam
//!
//! The host UI provides the actual code editor and tab container. The core only
//! needs to push text in, switch highlighting modes and toggle read-only, so
//! that is all these traits ask for.
//!
//! `BufferSurface` and `MemoryHost` keep everything in memory. They back the
//! headless binary and the tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::languages::Language;

/// Mode name every surface must accept
pub const PLAIN_TEXT_MODE: &str = "text";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("highlighting mode '{0}' is not available")]
pub struct ModeUnavailable(pub String);

/// One editor widget instance
pub trait EditorSurface: Send {
    /// Replace the buffer. Programmatic updates must not be reported back as
    /// user edits through `Workbench::text_changed`.
    fn set_value(&mut self, text: &str);
    fn value(&self) -> String;
    fn set_mode(&mut self, mode: &str) -> Result<(), ModeUnavailable>;
    fn set_read_only(&mut self, read_only: bool);
    fn goto_line(&mut self, line: usize);
}

pub type SharedSurface = Arc<Mutex<dyn EditorSurface>>;

/// The tab container that owns surfaces
pub trait SurfaceHost: Send + Sync + 'static {
    /// Create a tab with a fresh surface for `title`
    fn create(&self, language: Language, title: &str) -> SharedSurface;
    /// Bring the tab for `title` to the front
    fn focus(&self, title: &str);
    /// Remove the tab for `title`
    fn close(&self, title: &str);
}

/// Run `f` against a shared surface
pub fn with_surface<R>(surface: &SharedSurface, f: impl FnOnce(&mut dyn EditorSurface) -> R) -> R {
    let mut guard = surface.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut *guard)
}

// ── In-memory implementation ────────────────────────────────────────────

/// A text buffer standing in for an editor widget
#[derive(Debug, Clone)]
pub struct BufferSurface {
    text: String,
    mode: String,
    read_only: bool,
    cursor_line: usize,
    modes: Vec<String>,
}

impl BufferSurface {
    /// A surface that knows the given highlighting modes besides plain text
    pub fn with_modes(modes: &[&str]) -> Self {
        Self {
            text: String::new(),
            mode: PLAIN_TEXT_MODE.to_string(),
            read_only: false,
            cursor_line: 0,
            modes: modes.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn cursor_line(&self) -> usize {
        self.cursor_line
    }
}

impl Default for BufferSurface {
    fn default() -> Self {
        Self::with_modes(&["javascript", "html", "css", "svg"])
    }
}

impl EditorSurface for BufferSurface {
    fn set_value(&mut self, text: &str) {
        self.text = text.to_string();
    }

    fn value(&self) -> String {
        self.text.clone()
    }

    fn set_mode(&mut self, mode: &str) -> Result<(), ModeUnavailable> {
        if mode == PLAIN_TEXT_MODE || self.modes.iter().any(|m| m == mode) {
            self.mode = mode.to_string();
            Ok(())
        } else {
            Err(ModeUnavailable(mode.to_string()))
        }
    }

    fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    fn goto_line(&mut self, line: usize) {
        self.cursor_line = line;
    }
}

#[derive(Default)]
struct HostState {
    tabs: Vec<String>,
    surfaces: HashMap<String, Arc<Mutex<BufferSurface>>>,
    focused: Option<String>,
}

/// Tabs of `BufferSurface`s, in the order they were opened
pub struct MemoryHost {
    modes: Vec<String>,
    state: Mutex<HostState>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::with_modes(&["javascript", "html", "css", "svg"])
    }
}

impl MemoryHost {
    pub fn with_modes(modes: &[&str]) -> Self {
        Self {
            modes: modes.iter().map(|m| m.to_string()).collect(),
            state: Mutex::new(HostState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tabs(&self) -> Vec<String> {
        self.lock().tabs.clone()
    }

    pub fn focused(&self) -> Option<String> {
        self.lock().focused.clone()
    }

    /// Snapshot of a tab's surface
    pub fn surface(&self, title: &str) -> Option<BufferSurface> {
        let surface = self.lock().surfaces.get(title).cloned()?;
        let guard = surface.lock().unwrap_or_else(PoisonError::into_inner);
        Some(guard.clone())
    }
}

impl SurfaceHost for MemoryHost {
    fn create(&self, _language: Language, title: &str) -> SharedSurface {
        let modes: Vec<&str> = self.modes.iter().map(String::as_str).collect();
        let surface = Arc::new(Mutex::new(BufferSurface::with_modes(&modes)));
        let mut state = self.lock();
        state.tabs.push(title.to_string());
        state.surfaces.insert(title.to_string(), surface.clone());
        state.focused = Some(title.to_string());
        surface
    }

    fn focus(&self, title: &str) {
        let mut state = self.lock();
        if state.surfaces.contains_key(title) {
            state.focused = Some(title.to_string());
        }
    }

    fn close(&self, title: &str) {
        let mut state = self.lock();
        state.tabs.retain(|t| t != title);
        state.surfaces.remove(title);
        if state.focused.as_deref() == Some(title) {
            state.focused = state.tabs.last().cloned();
        }
    }
}
