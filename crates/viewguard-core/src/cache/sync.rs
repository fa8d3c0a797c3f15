//! Pull-based refresh of the settings cache.
//!
//! Runs on its own interval, independent of the timer tick. A failed pull
//! leaves the cache untouched so evaluation keeps using the last-known-good
//! snapshot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::SettingsCache;
use crate::clock::Clock;
use crate::error::{RemoteError, SyncError};
use crate::lock::RemoteStore;
use crate::settings::{EnforcementSettings, RemoteSettings};
use crate::timer::TimerService;

/// Path of the family settings document in the remote store.
pub const SETTINGS_PATH: &str = "settings";

#[async_trait]
pub trait RemoteSettingsFetcher: Send + Sync {
    async fn fetch_settings(&self) -> Result<RemoteSettings, RemoteError>;
}

/// Reads [`RemoteSettings`] from a [`RemoteStore`] document.
pub struct StoreSettingsFetcher {
    store: Arc<dyn RemoteStore>,
    path: String,
}

impl StoreSettingsFetcher {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            path: SETTINGS_PATH.to_string(),
        }
    }
}

#[async_trait]
impl RemoteSettingsFetcher for StoreSettingsFetcher {
    async fn fetch_settings(&self) -> Result<RemoteSettings, RemoteError> {
        match self.store.read(&self.path).await? {
            // Nothing published yet.
            None => Ok(RemoteSettings::default()),
            Some(value) => serde_json::from_value(value).map_err(|e| RemoteError::Malformed {
                path: self.path.clone(),
                message: e.to_string(),
            }),
        }
    }
}

pub struct SettingsSync {
    device_id: String,
    fetcher: Arc<dyn RemoteSettingsFetcher>,
    cache: Arc<SettingsCache>,
    clock: Arc<dyn Clock>,
    timer: Option<Arc<TimerService>>,
}

impl SettingsSync {
    pub fn new(
        device_id: impl Into<String>,
        fetcher: Arc<dyn RemoteSettingsFetcher>,
        cache: Arc<SettingsCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            fetcher,
            cache,
            clock,
            timer: None,
        }
    }

    /// Re-evaluate `timer` whenever a pull changes the snapshot.
    pub fn notify(mut self, timer: Arc<TimerService>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Fetch, project onto this device, and cache.
    ///
    /// # Errors
    /// On fetch or cache failure; the cached snapshot is left as it was.
    pub async fn pull_once(&self) -> Result<EnforcementSettings, SyncError> {
        let remote = self.fetcher.fetch_settings().await?;
        let settings = remote.for_device(&self.device_id);

        let changed = match self.cache.load_settings() {
            Ok(Some(cached)) => cached.settings != settings,
            _ => true,
        };
        self.cache
            .store_settings(&settings, self.clock.now().with_timezone(&Utc))?;

        if changed {
            info!(
                schedules = settings.schedules.len(),
                app_enabled = settings.is_app_enabled,
                revoked = settings.is_device_revoked,
                "enforcement settings updated"
            );
            if let Some(timer) = &self.timer {
                timer.evaluate().await;
            }
        } else {
            debug!("enforcement settings unchanged");
        }
        Ok(settings)
    }

    /// Pull every `interval` until the returned handle is stopped or dropped.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> PeriodicTask {
        PeriodicTask::spawn("settings-sync", interval, move || {
            let sync = Arc::clone(&self);
            async move {
                if let Err(e) = sync.pull_once().await {
                    warn!(error = %e, "settings pull failed, keeping cached settings");
                }
            }
        })
    }
}

/// Handle to a background loop. Dropping it cancels the loop.
pub struct PeriodicTask {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub(crate) fn spawn<F, Fut>(name: &'static str, interval: Duration, mut run: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                }
                run().await;
            }
            debug!(task = name, "periodic task exited");
        });
        info!(task = name, interval_secs = interval.as_secs(), "periodic task started");
        Self {
            name,
            stop_tx,
            task: Some(task),
        }
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(task = self.name, error = %e, "periodic task ended abnormally");
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.stop_tx.send(true);
            task.abort();
        }
    }
}
