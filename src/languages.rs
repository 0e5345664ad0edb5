//! Content-type registry
//!
//! Maps the handful of tiddler kinds the editor knows about to a MIME type and
//! the tags a tiddler of that kind needs in TiddlyWiki compatibility mode.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Tiddler;

/// A content-type tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Html,
    Css,
    Svg,
    Other,
}

impl Language {
    /// Registry order, used for dialog options and directory sections
    pub const ALL: [Language; 5] = [
        Language::Javascript,
        Language::Html,
        Language::Css,
        Language::Svg,
        Language::Other,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Html => "html",
            Language::Css => "css",
            Language::Svg => "svg",
            Language::Other => "other",
        }
    }

    /// Unknown tags map to `Other`
    pub fn from_tag(tag: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|lang| lang.tag() == tag)
            .unwrap_or(Language::Other)
    }

    /// Name of the highlighting mode an editor surface should try
    pub fn mode_name(self) -> &'static str {
        self.tag()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One registry row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanguageEntry {
    pub language: Language,
    pub mime_type: &'static str,
    pub default_tags: &'static [&'static str],
}

/// The content-type registry. Immutable once built.
#[derive(Clone, Debug)]
pub struct Languages {
    entries: Vec<LanguageEntry>,
}

impl Default for Languages {
    fn default() -> Self {
        Self {
            entries: vec![
                LanguageEntry {
                    language: Language::Javascript,
                    mime_type: "text/javascript",
                    default_tags: &["systemConfig"],
                },
                LanguageEntry {
                    language: Language::Html,
                    mime_type: "text/html",
                    default_tags: &[],
                },
                LanguageEntry {
                    language: Language::Css,
                    mime_type: "text/css",
                    default_tags: &[],
                },
                LanguageEntry {
                    language: Language::Svg,
                    mime_type: "image/svg+xml",
                    default_tags: &[],
                },
                LanguageEntry {
                    language: Language::Other,
                    mime_type: "",
                    default_tags: &[],
                },
            ],
        }
    }
}

impl Languages {
    pub fn entry(&self, language: Language) -> &LanguageEntry {
        // Every Language has a row; Other is last and always matches
        self.entries
            .iter()
            .find(|e| e.language == language)
            .unwrap_or(&self.entries[self.entries.len() - 1])
    }

    pub fn mime_type(&self, language: Language) -> &'static str {
        self.entry(language).mime_type
    }

    pub fn default_tags(&self, language: Language) -> &'static [&'static str] {
        self.entry(language).default_tags
    }

    /// Tags in registry order
    pub fn tags(&self) -> impl Iterator<Item = Language> + '_ {
        self.entries.iter().map(|e| e.language)
    }

    /// Best matching language for a tiddler's MIME type
    pub fn classify(&self, tiddler: Option<&Tiddler>) -> Language {
        let mime = match tiddler {
            Some(t) if !t.tiddler_type.is_empty() => t.tiddler_type.as_str(),
            _ => return Language::Other,
        };
        self.classify_mime(mime)
    }

    pub fn classify_mime(&self, mime: &str) -> Language {
        if mime.is_empty() {
            return Language::Other;
        }
        self.entries
            .iter()
            .find(|e| !e.mime_type.is_empty() && e.mime_type == mime)
            .map(|e| e.language)
            .unwrap_or(Language::Other)
    }

    /// Whether a MIME type belongs to one of the typed sections
    pub fn is_known_mime(&self, mime: &str) -> bool {
        self.classify_mime(mime) != Language::Other
    }
}
