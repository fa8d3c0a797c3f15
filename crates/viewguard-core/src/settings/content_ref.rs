//! References to videos and collections inside allow/block lists.
//!
//! Remote lists were written by two generations of the parent app: one
//! stored stable ids, the other stored display titles. A bare string in a
//! list therefore matches an item by id *or* by title.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentRef {
    /// Matches only the stable id.
    Id(String),
    /// Matches only the display title / name.
    Title(String),
    /// Legacy bare string, matches either field.
    IdOrTitle(String),
}

impl ContentRef {
    pub fn matches(&self, id: &str, title: &str) -> bool {
        match self {
            ContentRef::Id(r) => r == id,
            ContentRef::Title(r) => r == title,
            ContentRef::IdOrTitle(r) => r == id || r == title,
        }
    }

    /// Match against a bare id, such as a video's collection membership.
    /// `Title` refs never match here.
    pub fn matches_id(&self, id: &str) -> bool {
        match self {
            ContentRef::Id(r) | ContentRef::IdOrTitle(r) => r == id,
            ContentRef::Title(_) => false,
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum ContentRefRepr {
    Bare(String),
    Tagged(ContentRef),
}

/// An allow or block list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ContentRefRepr>", into = "Vec<ContentRefRepr>")]
pub struct ContentRefSet {
    refs: Vec<ContentRef>,
}

impl ContentRefSet {
    pub fn new(refs: Vec<ContentRef>) -> Self {
        Self { refs }
    }

    /// Build from remote strings; each one is matched against id and title.
    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            refs: raw
                .into_iter()
                .map(|s| ContentRef::IdOrTitle(s.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentRef> {
        self.refs.iter()
    }

    pub fn matches(&self, id: &str, title: &str) -> bool {
        self.refs.iter().any(|r| r.matches(id, title))
    }

    pub fn matches_id(&self, id: &str) -> bool {
        self.refs.iter().any(|r| r.matches_id(id))
    }
}

impl From<Vec<ContentRefRepr>> for ContentRefSet {
    fn from(raw: Vec<ContentRefRepr>) -> Self {
        let refs = raw
            .into_iter()
            .map(|r| match r {
                ContentRefRepr::Bare(s) => ContentRef::IdOrTitle(s),
                ContentRefRepr::Tagged(r) => r,
            })
            .collect();
        Self { refs }
    }
}

impl From<ContentRefSet> for Vec<ContentRefRepr> {
    fn from(set: ContentRefSet) -> Self {
        set.refs
            .into_iter()
            .map(|r| match r {
                ContentRef::IdOrTitle(s) => ContentRefRepr::Bare(s),
                other => ContentRefRepr::Tagged(other),
            })
            .collect()
    }
}
