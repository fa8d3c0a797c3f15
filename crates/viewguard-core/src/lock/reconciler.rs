//! Child-side reconciliation of synced enabled-flags.
//!
//! Remote flags are authoritative. Each pass replaces the cached flags,
//! interrupts the playing video if its flag went off, and re-evaluates the
//! timer. A failed pass leaves the cached flags in place.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::command::{LockCommand, LockTarget};
use super::store::RemoteStore;
use crate::cache::{PeriodicTask, SettingsCache};
use crate::config::LockConfig;
use crate::content::ContentFlags;
use crate::error::{RemoteError, SyncError};
use crate::timer::TimerService;

/// Interruption policy used when a lock record is missing or unreadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDefaults {
    pub warning_minutes: u32,
    pub allow_finish: bool,
}

impl Default for LockDefaults {
    fn default() -> Self {
        Self {
            warning_minutes: 5,
            allow_finish: true,
        }
    }
}

impl From<&LockConfig> for LockDefaults {
    fn from(config: &LockConfig) -> Self {
        Self {
            warning_minutes: config.default_warning_minutes,
            allow_finish: config.default_allow_finish,
        }
    }
}

/// Flags that flipped in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagChanges {
    pub disabled_videos: Vec<String>,
    pub enabled_videos: Vec<String>,
    pub disabled_collections: Vec<String>,
    pub enabled_collections: Vec<String>,
}

impl FlagChanges {
    pub fn between(previous: &ContentFlags, current: &ContentFlags) -> Self {
        let (disabled_videos, enabled_videos) = diff(&previous.videos, &current.videos);
        let (disabled_collections, enabled_collections) =
            diff(&previous.collections, &current.collections);
        Self {
            disabled_videos,
            enabled_videos,
            disabled_collections,
            enabled_collections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.disabled_videos.is_empty()
            && self.enabled_videos.is_empty()
            && self.disabled_collections.is_empty()
            && self.enabled_collections.is_empty()
    }
}

fn diff(
    previous: &std::collections::BTreeMap<String, bool>,
    current: &std::collections::BTreeMap<String, bool>,
) -> (Vec<String>, Vec<String>) {
    let mut disabled = Vec::new();
    let mut enabled = Vec::new();
    for (id, &now_enabled) in current {
        let was_enabled = previous.get(id).copied().unwrap_or(true);
        match (was_enabled, now_enabled) {
            (true, false) => disabled.push(id.clone()),
            (false, true) => enabled.push(id.clone()),
            _ => {}
        }
    }
    // An item that vanished remotely no longer carries a lock.
    for (id, &was_enabled) in previous {
        if !was_enabled && !current.contains_key(id) {
            enabled.push(id.clone());
        }
    }
    (disabled, enabled)
}

pub struct LockReconciler {
    store: Arc<dyn RemoteStore>,
    cache: Arc<SettingsCache>,
    timer: Option<Arc<TimerService>>,
    defaults: LockDefaults,
}

impl LockReconciler {
    pub fn new(store: Arc<dyn RemoteStore>, cache: Arc<SettingsCache>) -> Self {
        Self {
            store,
            cache,
            timer: None,
            defaults: LockDefaults::default(),
        }
    }

    pub fn notify(mut self, timer: Arc<TimerService>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn defaults(mut self, defaults: LockDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Pull remote flags into the cache and react to changes.
    ///
    /// # Errors
    /// On a failed read or cache write; cached flags stay as they were.
    pub async fn reconcile(&self) -> Result<FlagChanges, SyncError> {
        let remote = fetch_flags(self.store.as_ref()).await?;
        let previous = self.cache.load_flags().unwrap_or_else(|e| {
            warn!(error = %e, "cached flags unreadable, treating all as enabled");
            ContentFlags::default()
        });
        let changes = FlagChanges::between(&previous, &remote);
        self.cache.store_flags(&remote)?;

        if changes.is_empty() {
            debug!("content flags unchanged");
            return Ok(changes);
        }
        info!(
            disabled_videos = changes.disabled_videos.len(),
            enabled_videos = changes.enabled_videos.len(),
            disabled_collections = changes.disabled_collections.len(),
            enabled_collections = changes.enabled_collections.len(),
            "content flags changed"
        );

        if let Some(timer) = &self.timer {
            match timer.state().current_video_id {
                Some(video_id) if changes.disabled_videos.contains(&video_id) => {
                    let policy = self.policy_for(&video_id).await;
                    timer
                        .on_content_locked(&video_id, policy.allow_finish, policy.warning_minutes)
                        .await;
                }
                Some(video_id) if changes.enabled_videos.contains(&video_id) => {
                    timer.on_content_unlocked(&video_id).await;
                }
                _ => timer.evaluate().await,
            }
        }
        Ok(changes)
    }

    /// Reconcile every `interval` until the handle is stopped or dropped.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> PeriodicTask {
        PeriodicTask::spawn("lock-reconciler", interval, move || {
            let reconciler = Arc::clone(&self);
            async move {
                if let Err(e) = reconciler.reconcile().await {
                    warn!(error = %e, "flag reconcile failed, keeping cached flags");
                }
            }
        })
    }

    async fn policy_for(&self, video_id: &str) -> LockDefaults {
        let path = LockTarget::Video(video_id.to_owned()).record_path();
        let record = match self.store.read(&path).await {
            Ok(Some(value)) => value,
            Ok(None) => return self.defaults,
            Err(e) => {
                warn!(video_id, error = %e, "lock record unreadable, using defaults");
                return self.defaults;
            }
        };
        match serde_json::from_value::<LockCommand>(record) {
            Ok(cmd) => LockDefaults {
                warning_minutes: cmd.warning_minutes,
                allow_finish: cmd.allow_finish_current_video,
            },
            Err(e) => {
                warn!(video_id, error = %e, "malformed lock record, using defaults");
                self.defaults
            }
        }
    }
}

async fn fetch_flags(store: &dyn RemoteStore) -> Result<ContentFlags, RemoteError> {
    let enabled = |value: &Value| value.get("enabled").and_then(Value::as_bool).unwrap_or(true);
    let videos = store.list("videos").await?;
    let collections = store.list("collections").await?;
    Ok(ContentFlags {
        videos: videos.iter().map(|(id, v)| (id.clone(), enabled(v))).collect(),
        collections: collections
            .iter()
            .map(|(id, v)| (id.clone(), enabled(v)))
            .collect(),
    })
}
