//! Core data types for TiddlyAce
//!
//! This module contains the records exchanged with a TiddlyWeb server:
//! - Tiddlers, in the JSON shape TiddlyWeb serves and accepts
//! - Bags and the resolved space/recipe
//! - The `/status` response

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Permission a tiddler must carry to be editable
pub const WRITE_PERMISSION: &str = "write";

/// A tiddler as served by TiddlyWeb
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tiddler {
    pub title: String,
    /// Absent in skinny listings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// MIME type; empty means untyped
    #[serde(rename = "type", default)]
    pub tiddler_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub bag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, String>,
    /// Set when this copy came from the server; never sent over the wire
    #[serde(skip)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl Tiddler {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Body text, empty for skinny or new tiddlers
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// A tiddler without a permissions list is treated as writable
    pub fn is_writable(&self) -> bool {
        match &self.permissions {
            Some(perms) => perms.iter().any(|p| p == WRITE_PERMISSION),
            None => true,
        }
    }

    /// Whether the server has produced this copy at least once
    pub fn is_synced(&self) -> bool {
        self.last_sync.is_some()
    }

    /// Add tags that are not already present, keeping existing order
    pub fn merge_tags<S: AsRef<str>>(&mut self, tags: &[S]) {
        for tag in tags {
            let tag = tag.as_ref();
            if !self.tags.iter().any(|t| t == tag) {
                self.tags.push(tag.to_string());
            }
        }
    }
}

/// A bag (container) on the server
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bag {
    pub name: String,
}

impl Bag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Space a bag belongs to: "foo_public" and "foo_private" both belong to "foo"
    pub fn space_name(&self) -> &str {
        bag_space_name(&self.name)
    }
}

/// Strip the trailing `_suffix` from a bag name
pub fn bag_space_name(bag: &str) -> &str {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    let re = SUFFIX.get_or_init(|| Regex::new(r"_[^_]*$").expect("valid bag suffix regex"));
    match re.find(bag) {
        Some(m) => &bag[..m.start()],
        None => bag,
    }
}

/// The namespace tiddlers are fetched from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub name: String,
    pub recipe: String,
}

impl Space {
    /// Build a space from a recipe name alone ("foo_public" -> space "foo")
    pub fn from_recipe(recipe: impl Into<String>) -> Self {
        let recipe = recipe.into();
        Self {
            name: bag_space_name(&recipe).to_string(),
            recipe,
        }
    }

    /// Bag new tiddlers are created in
    pub fn public_bag(&self) -> String {
        format!("{}_public", self.name)
    }
}

/// Space section of the `/status` response
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusSpace {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recipe: Option<String>,
}

/// Response of `GET /status`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerStatus {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub space: Option<StatusSpace>,
}

impl ServerStatus {
    /// Resolve the space, falling back to deriving the name from the recipe
    pub fn space(&self) -> Option<Space> {
        let space = self.space.as_ref()?;
        match (&space.name, &space.recipe) {
            (Some(name), Some(recipe)) => Some(Space {
                name: name.clone(),
                recipe: recipe.clone(),
            }),
            (Some(name), None) => Some(Space {
                name: name.clone(),
                recipe: format!("{}_public", name),
            }),
            (None, Some(recipe)) => Some(Space::from_recipe(recipe.clone())),
            (None, None) => None,
        }
    }
}
