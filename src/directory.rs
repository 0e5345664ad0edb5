//! Tiddler directory
//!
//! Groups tiddlers into one section per language, split into the current
//! space's own tiddlers and read-only ones included from other spaces.
//! Purely derived from the store; rebuilt whenever the host asks.

use std::collections::{BTreeMap, HashSet};

use crate::languages::{Language, Languages};
use crate::types::{bag_space_name, Tiddler};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub title: String,
    pub language: Language,
    pub bag: String,
    pub read_only: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directory {
    sections: BTreeMap<(bool, Language), Vec<DirectoryEntry>>,
}

impl Directory {
    /// Build sections for `space`. A tiddler is read-only here when its bag belongs to
    /// another space.
    pub fn build(tiddlers: &[Tiddler], space: &str, languages: &Languages) -> Self {
        let mut seen = HashSet::new();
        let mut sections: BTreeMap<(bool, Language), Vec<DirectoryEntry>> = BTreeMap::new();

        for tiddler in tiddlers {
            if !seen.insert(tiddler.title.as_str()) {
                continue;
            }
            let language = languages.classify(Some(tiddler));
            let read_only = bag_space_name(&tiddler.bag) != space;
            sections
                .entry((read_only, language))
                .or_default()
                .push(DirectoryEntry {
                    title: tiddler.title.clone(),
                    language,
                    bag: tiddler.bag.clone(),
                    read_only,
                });
        }

        for entries in sections.values_mut() {
            entries.sort_by_cached_key(|e| e.title.to_lowercase());
        }
        Self { sections }
    }

    pub fn section(&self, language: Language, read_only: bool) -> &[DirectoryEntry] {
        self.sections
            .get(&(read_only, language))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All entries ordered by case-insensitive title
    pub fn listing(&self) -> Vec<&DirectoryEntry> {
        let mut all: Vec<&DirectoryEntry> = self.sections.values().flatten().collect();
        all.sort_by_cached_key(|e| e.title.to_lowercase());
        all
    }

    pub fn len(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
