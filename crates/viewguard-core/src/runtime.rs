//! Wiring of the child-device enforcement loop.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::cache::{PeriodicTask, SettingsCache, SettingsSync, StoreSettingsFetcher};
use crate::clock::Clock;
use crate::config::{data_dir, Config};
use crate::device_id::DeviceId;
use crate::error::CoreError;
use crate::lock::{LockDefaults, LockReconciler, RemoteStore};
use crate::timer::{SessionStore, TimerService};

/// Timer, settings pull and flag reconciler running together.
///
/// Must be started inside a Tokio runtime.
pub struct EnforcementRuntime {
    device_id: String,
    timer: Arc<TimerService>,
    settings_sync: PeriodicTask,
    reconciler: PeriodicTask,
}

impl EnforcementRuntime {
    /// Start with the device id and settings cache kept in the data
    /// directory.
    pub fn open_default(
        config: &Config,
        store: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        Self::open(config, &data_dir()?, store, clock)
    }

    /// Start with the device id and settings cache kept in `dir`.
    pub fn open(
        config: &Config,
        dir: &Path,
        store: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        fs::create_dir_all(dir)?;
        let device_id = DeviceId::resolve(config, dir)?;
        let cache = Arc::new(SettingsCache::open(&dir.join(&config.storage.cache_file))?);
        Ok(Self::start(config, device_id.as_str(), store, cache, clock))
    }

    pub fn start(
        config: &Config,
        device_id: &str,
        store: Arc<dyn RemoteStore>,
        cache: Arc<SettingsCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions: Arc<dyn SessionStore> = cache.clone();
        let timer = Arc::new(
            TimerService::builder(device_id, cache.clone(), clock.clone())
                .session_store(sessions)
                .config(config)
                .build(),
        );
        timer.start();

        let settings_sync = Arc::new(
            SettingsSync::new(
                device_id,
                Arc::new(StoreSettingsFetcher::new(store.clone())),
                cache.clone(),
                clock,
            )
            .notify(timer.clone()),
        )
        .spawn(config.sync.pull_interval());

        let reconciler = Arc::new(
            LockReconciler::new(store, cache)
                .defaults(LockDefaults::from(&config.lock))
                .notify(timer.clone()),
        )
        .spawn(config.sync.pull_interval());

        info!(device_id, "enforcement runtime started");
        Self {
            device_id: device_id.to_owned(),
            timer,
            settings_sync,
            reconciler,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn timer(&self) -> &Arc<TimerService> {
        &self.timer
    }

    /// Stop every background loop.
    pub async fn shutdown(self) {
        self.settings_sync.stop().await;
        self.reconciler.stop().await;
        self.timer.shutdown().await;
        info!("enforcement runtime stopped");
    }
}
