//! Remote lock propagation.
//!
//! Parent side: [`LockPropagator`] turns a lock on a collection into one
//! atomic batch over the collection, its seasons and their videos.
//! Child side: [`LockReconciler`] mirrors the resulting enabled-flags into the
//! local cache and pushes the change into the running timer.
//!
//! Remote layout:
//!
//! ```text
//! collections/{id}                  Collection record, with `enabled`
//! videos/{id}                       Video record, with `enabled`
//! lock_commands/collections/{id}    latest LockCommand for the collection
//! lock_commands/videos/{id}         latest LockCommand for the video
//! settings                          RemoteSettings document
//! ```

mod cascade;
mod command;
mod propagator;
mod reconciler;
mod store;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::content::{Collection, Video};
use crate::error::RemoteError;

pub use cascade::CascadeClosure;
pub use command::{LockCommand, LockTarget};
pub use propagator::{CascadeReport, LockPropagator, RetryPolicy};
pub use reconciler::{FlagChanges, LockDefaults, LockReconciler};
pub use store::{MemoryRemoteStore, RemoteStore, WriteBatch};

pub(crate) async fn load_collections(store: &dyn RemoteStore) -> Result<Vec<Collection>, RemoteError> {
    load_items(store, "collections").await
}

pub(crate) async fn load_videos(store: &dyn RemoteStore) -> Result<Vec<Video>, RemoteError> {
    load_items(store, "videos").await
}

/// Decode every child of `parent`. Records keyed by id may omit the `id`
/// field. One bad record fails the load, since a partial tree would give a
/// partial cascade.
async fn load_items<T: DeserializeOwned>(
    store: &dyn RemoteStore,
    parent: &str,
) -> Result<Vec<T>, RemoteError> {
    store
        .list(parent)
        .await?
        .into_iter()
        .map(|(key, mut value)| {
            if let Value::Object(map) = &mut value {
                map.entry("id").or_insert_with(|| Value::String(key.clone()));
            }
            serde_json::from_value(value).map_err(|e| RemoteError::Malformed {
                path: format!("{parent}/{key}"),
                message: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_take_their_id_from_the_key() {
        let store = MemoryRemoteStore::new(json!({
            "collections": { "c1": { "name": "Disney" } },
            "videos": { "v1": { "title": "Frozen", "collectionIds": ["c1"], "enabled": false } }
        }));
        let collections = load_collections(&store).await.unwrap();
        assert_eq!(collections[0].id, "c1");
        let videos = load_videos(&store).await.unwrap();
        assert_eq!(videos[0].id, "v1");
        assert!(!videos[0].enabled);
    }

    #[tokio::test]
    async fn malformed_record_fails_the_load() {
        let store = MemoryRemoteStore::new(json!({
            "videos": { "v1": { "title": 42 } }
        }));
        let err = load_videos(&store).await.unwrap_err();
        assert!(matches!(err, RemoteError::Malformed { ref path, .. } if path == "videos/v1"));
    }
}
