//! # ViewGuard Core Library
//!
//! Viewing-time enforcement for a child video player: decides whether the
//! device may browse or play right now, meters watched minutes against a
//! quota, and carries parent lock commands down to the device.
//!
//! ## Architecture
//!
//! - **Schedule evaluator**: pure `(settings, device, now) -> ScheduleResult`
//! - **Content filter**: pure gating of collections and videos against a result
//! - **Viewing timer**: a state machine driven by a periodic tick and playback
//!   signals, owned by an async single-writer service
//! - **Settings cache**: SQLite last-known-good snapshot kept warm by a pull loop
//! - **Lock propagation**: atomic cascade writes on the parent side, flag
//!   reconciliation on the child side
//!
//! ## Key Components
//!
//! - [`evaluate`]: schedule evaluation
//! - [`TimerService`]: running viewing timer
//! - [`SettingsCache`]: local settings and flag storage
//! - [`LockPropagator`] / [`LockReconciler`]: lock protocol endpoints
//! - [`Config`]: application configuration

pub mod cache;
pub mod clock;
pub mod config;
pub mod content;
pub mod device_id;
pub mod error;
pub mod events;
pub mod lock;
pub mod runtime;
pub mod schedule;
pub mod settings;
pub mod timer;

pub use cache::{SettingsCache, SettingsSource, SettingsSync};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use device_id::DeviceId;
pub use content::{Collection, ContentFlags, Video};
pub use error::{CacheError, ConfigError, CoreError, LockError, RemoteError, SyncError};
pub use events::Event;
pub use lock::{LockCommand, LockPropagator, LockReconciler, LockTarget, MemoryRemoteStore, RemoteStore};
pub use runtime::EnforcementRuntime;
pub use schedule::{evaluate, ScheduleReason, ScheduleResult};
pub use settings::{EnforcementSettings, RemoteSettings, Schedule};
pub use timer::{TimerService, TimerState, ViewingState};
