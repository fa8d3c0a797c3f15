//! Path-addressable remote key-value store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;

/// Set of path writes applied as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: BTreeMap<String, Value>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write; `Value::Null` deletes the path.
    pub fn set(&mut self, path: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.writes.insert(path.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.writes.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.writes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Remote source of truth for content records, flags and lock commands.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Value at `path`, or `None` when absent.
    async fn read(&self, path: &str) -> Result<Option<Value>, RemoteError>;

    /// Direct children of `path`, keyed by their final path segment.
    async fn list(&self, path: &str) -> Result<BTreeMap<String, Value>, RemoteError>;

    /// Apply every write in `batch` or none of them.
    async fn update(&self, batch: &WriteBatch) -> Result<(), RemoteError>;
}

#[derive(Default)]
struct MemoryState {
    root: Value,
    read_failure: Option<RemoteError>,
    update_failures: VecDeque<RemoteError>,
    update_calls: u32,
}

/// In-process [`RemoteStore`] over a JSON tree.
///
/// Batches are applied to a copy of the tree and swapped in, so a failed
/// batch is never visible. Failures can be injected for tests and
/// offline simulation.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
}

impl MemoryRemoteStore {
    pub fn new(root: Value) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                root,
                ..MemoryState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.state().root.clone()
    }

    /// Value at `path` without going through the async API.
    pub fn get(&self, path: &str) -> Option<Value> {
        get_path(&self.state().root, path).cloned()
    }

    /// Write directly, bypassing failure injection.
    pub fn put(&self, path: &str, value: Value) {
        set_path(&mut self.state().root, path, value);
    }

    /// Fail every read and list with `error` until cleared.
    pub fn fail_reads(&self, error: RemoteError) {
        self.state().read_failure = Some(error);
    }

    /// Fail the next updates, one error per call.
    pub fn fail_next_updates(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state().update_failures.extend(errors);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.read_failure = None;
        state.update_failures.clear();
    }

    /// Number of `update` calls, failed ones included.
    pub fn update_calls(&self) -> u32 {
        self.state().update_calls
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        let state = self.state();
        if let Some(err) = &state.read_failure {
            return Err(err.clone());
        }
        Ok(get_path(&state.root, path).cloned())
    }

    async fn list(&self, path: &str) -> Result<BTreeMap<String, Value>, RemoteError> {
        let state = self.state();
        if let Some(err) = &state.read_failure {
            return Err(err.clone());
        }
        match get_path(&state.root, path) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(children)) => Ok(children
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            Some(_) => Err(RemoteError::Malformed {
                path: path.to_owned(),
                message: "expected an object".into(),
            }),
        }
    }

    async fn update(&self, batch: &WriteBatch) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.update_calls += 1;
        if let Some(err) = state.update_failures.pop_front() {
            return Err(err);
        }
        let mut next = state.root.clone();
        for (path, value) in batch.iter() {
            set_path(&mut next, path, value.clone());
        }
        state.root = next;
        Ok(())
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(root, |node, key| node.get(key))
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    let keys: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = keys.split_last() else {
        *root = value;
        return;
    };

    // Indexing a null node turns it into an object.
    let mut node = root;
    for key in parents {
        if !node.is_object() {
            *node = Value::Null;
        }
        node = &mut node[*key];
    }

    if value.is_null() {
        if let Some(map) = node.as_object_mut() {
            map.remove(*last);
        }
    } else {
        if !node.is_object() {
            *node = Value::Null;
        }
        node[*last] = value;
    }
}
