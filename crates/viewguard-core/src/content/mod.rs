//! Content items as the enforcement core sees them.
//!
//! Only the fields needed for gating are modelled: identity, display name,
//! collection membership / parentage, and the synced `enabled` flag.

pub mod filter;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use filter::{blocked_reason, can_play_video, check_video, filter_collections, filter_videos, BlockedReason};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub collection_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Video {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            collection_ids: Vec::new(),
            enabled: true,
        }
    }

    pub fn in_collection(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_ids.push(collection_id.into());
        self
    }
}

/// A show, season, playlist or folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub name: String,
    /// Set on seasons: the owning show.
    #[serde(default)]
    pub parent_collection_id: Option<String>,
    /// Older records link seasons to their show by name only.
    #[serde(default)]
    pub parent_collection_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Collection {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_collection_id: None,
            parent_collection_name: None,
            enabled: true,
        }
    }

    pub fn child_of(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_collection_id = Some(parent_id.into());
        self
    }

    /// Whether this collection names `parent` as its parent, by id or by name.
    pub fn is_child_of(&self, parent: &Collection) -> bool {
        self.id != parent.id
            && (self.parent_collection_id.as_deref() == Some(parent.id.as_str())
                || self.parent_collection_name.as_deref() == Some(parent.name.as_str()))
    }
}

/// Locally cached projection of the remote enabled flags.
///
/// These are authoritative: an entry here wins over whatever `enabled`
/// value the item was loaded with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFlags {
    pub videos: BTreeMap<String, bool>,
    pub collections: BTreeMap<String, bool>,
}

impl ContentFlags {
    pub fn video_enabled(&self, id: &str) -> Option<bool> {
        self.videos.get(id).copied()
    }

    pub fn collection_enabled(&self, id: &str) -> Option<bool> {
        self.collections.get(id).copied()
    }

    pub fn apply_to_videos(&self, videos: &mut [Video]) {
        for v in videos {
            if let Some(enabled) = self.video_enabled(&v.id) {
                v.enabled = enabled;
            }
        }
    }

    pub fn apply_to_collections(&self, collections: &mut [Collection]) {
        for c in collections {
            if let Some(enabled) = self.collection_enabled(&c.id) {
                c.enabled = enabled;
            }
        }
    }
}

fn default_true() -> bool {
    true
}
