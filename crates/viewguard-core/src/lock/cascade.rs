//! Closure computation for collection locks.
//!
//! A lock on a show reaches every season below it (transitively, linked by
//! parent id or parent name) and every video that belongs to the show or any
//! of those seasons. The whole closure is computed before anything is written.

use std::collections::{BTreeSet, VecDeque};

use super::command::{LockCommand, LockTarget};
use super::store::WriteBatch;
use crate::content::{Collection, Video};

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeClosure {
    pub target: Collection,
    /// Descendant collections, nearest first.
    pub seasons: Vec<Collection>,
    pub videos: Vec<Video>,
}

impl CascadeClosure {
    /// Closure of `target_id` over the given content tree, or `None` when the
    /// target is not among `collections`.
    pub fn compute(target_id: &str, collections: &[Collection], videos: &[Video]) -> Option<Self> {
        let target = collections.iter().find(|c| c.id == target_id)?.clone();

        let mut reached: BTreeSet<&str> = BTreeSet::from([target.id.as_str()]);
        let mut seasons = Vec::new();
        let mut frontier = VecDeque::from([&target]);
        while let Some(parent) = frontier.pop_front() {
            for child in collections {
                if child.is_child_of(parent) && reached.insert(child.id.as_str()) {
                    seasons.push(child.clone());
                    frontier.push_back(child);
                }
            }
        }

        let videos = videos
            .iter()
            .filter(|v| v.collection_ids.iter().any(|id| reached.contains(id.as_str())))
            .cloned()
            .collect();

        Some(Self {
            target,
            seasons,
            videos,
        })
    }

    /// Number of enabled-flags the batch writes.
    pub fn flag_writes(&self) -> usize {
        1 + self.seasons.len() + self.videos.len()
    }

    /// One flag and one command record per item in the closure.
    pub fn to_batch(&self, command: &LockCommand) -> WriteBatch {
        let origin = self.target.id.as_str();
        let mut batch = WriteBatch::new();
        write_target(&mut batch, command);

        for season in &self.seasons {
            let target = LockTarget::Collection(season.id.clone());
            write_target(&mut batch, &command.cascaded(target, origin));
        }
        for video in &self.videos {
            let target = LockTarget::Video(video.id.clone());
            write_target(&mut batch, &command.cascaded(target, origin));
        }
        batch
    }
}

/// Queue the flag and record writes for one command.
pub(crate) fn write_target(batch: &mut WriteBatch, command: &LockCommand) {
    batch.set(command.target.flag_path(), command.enabled());
    // LockCommand has only plain fields; serializing cannot fail.
    let record = serde_json::to_value(command).unwrap_or_default();
    batch.set(command.target.record_path(), record);
}
