//! Local enforcement settings cache and the pull loop that keeps it warm.

mod store;
mod sync;

use async_trait::async_trait;

use crate::content::ContentFlags;
use crate::settings::EnforcementSettings;

pub use store::{CachedSettings, SettingsCache};
pub use sync::{
    PeriodicTask, RemoteSettingsFetcher, SettingsSync, StoreSettingsFetcher, SETTINGS_PATH,
};

/// Where the timer reads its settings from.
///
/// Implementations never fail: with no data yet, or on a read error, they
/// hand back permissive defaults (which still deny for lack of a schedule).
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn enforcement_settings(&self) -> EnforcementSettings;

    async fn content_flags(&self) -> ContentFlags {
        ContentFlags::default()
    }
}
