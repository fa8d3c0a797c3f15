//! Async owner of the [`ViewingTimer`].
//!
//! All mutation funnels through one gate so the periodic tick never runs
//! alongside an imperative call. Settings and flags are read from the cache
//! before the gate is taken; the gate only covers compute and commit.
//! Readers sample the published `watch` snapshot and never touch the engine.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::engine::{TimerState, ViewingState, ViewingTimer};
use super::session::{SessionRecord, SessionStore};
use crate::cache::SettingsSource;
use crate::clock::Clock;
use crate::config::Config;
use crate::events::Event;
use crate::schedule::{self, ScheduleResult};
use crate::settings::EnforcementSettings;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);
const EVENT_CAPACITY: usize = 64;

struct Inner {
    device_id: String,
    clock: Arc<dyn Clock>,
    settings: Arc<dyn SettingsSource>,
    sessions: Option<Arc<dyn SessionStore>>,
    engine: Mutex<ViewingTimer>,
    /// Held for one compute-and-commit; never across a cache read.
    gate: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<TimerState>,
    result_tx: watch::Sender<Option<ScheduleResult>>,
    events_tx: broadcast::Sender<Event>,
}

struct TickTask {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct TimerServiceBuilder {
    device_id: String,
    clock: Arc<dyn Clock>,
    settings: Arc<dyn SettingsSource>,
    sessions: Option<Arc<dyn SessionStore>>,
    tick_interval: Duration,
}

impl TimerServiceBuilder {
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Apply the `[timer]` section. The session store is only kept when
    /// `persist_session` is on.
    pub fn config(mut self, config: &Config) -> Self {
        self.tick_interval = config.timer.tick_interval();
        if !config.timer.persist_session {
            self.sessions = None;
        }
        self
    }

    pub fn build(self) -> TimerService {
        let mut engine = ViewingTimer::new();
        if let Some(store) = &self.sessions {
            let today = self.clock.now().date_naive();
            match store.load_session() {
                Ok(Some(record)) => match record.minutes_for(today) {
                    Some(minutes) => {
                        info!(minutes, "restored watched minutes from previous run");
                        engine.restore_watched_minutes(minutes, today);
                    }
                    None => {
                        debug!(date = %record.session_date, "discarding session from another day");
                        if let Err(e) = store.clear_session() {
                            warn!(error = %e, "failed to clear stale session");
                        }
                    }
                },
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to load session, starting empty"),
            }
        }

        let (state_tx, _) = watch::channel(engine.snapshot());
        let (result_tx, _) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        TimerService {
            inner: Arc::new(Inner {
                device_id: self.device_id,
                clock: self.clock,
                settings: self.settings,
                sessions: self.sessions,
                engine: Mutex::new(engine),
                gate: tokio::sync::Mutex::new(()),
                state_tx,
                result_tx,
                events_tx,
            }),
            tick_interval: self.tick_interval,
            ticker: Mutex::new(None),
        }
    }
}

/// Viewing timer service.
///
/// Construct with [`TimerService::builder`], then [`start`](Self::start)
/// the tick loop. Dropping the service or calling
/// [`shutdown`](Self::shutdown) stops it.
pub struct TimerService {
    inner: Arc<Inner>,
    tick_interval: Duration,
    ticker: Mutex<Option<TickTask>>,
}

impl TimerService {
    pub fn builder(
        device_id: impl Into<String>,
        settings: Arc<dyn SettingsSource>,
        clock: Arc<dyn Clock>,
    ) -> TimerServiceBuilder {
        TimerServiceBuilder {
            device_id: device_id.into(),
            clock,
            settings,
            sessions: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the periodic tick. No-op if already running.
    pub fn start(&self) {
        let mut ticker = lock(&self.ticker);
        if ticker.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(tick_loop(
            Arc::downgrade(&self.inner),
            self.tick_interval,
            stop_rx,
        ));
        info!(interval_secs = self.tick_interval.as_secs(), "viewing timer started");
        *ticker = Some(TickTask { stop_tx, task });
    }

    /// Stop the tick loop and wait for it to exit.
    pub async fn shutdown(&self) {
        let Some(TickTask { stop_tx, task }) = lock(&self.ticker).take() else {
            return;
        };
        let _ = stop_tx.send(true);
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "tick task ended abnormally");
            }
        }
        info!("viewing timer stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.ticker).is_some()
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Run one evaluation unless another transition is in flight.
    /// Returns `false` when the tick was skipped.
    pub async fn tick(&self) -> bool {
        self.inner.tick().await
    }

    /// Evaluate now, waiting for any in-flight transition first.
    pub async fn evaluate(&self) {
        let settings = self.inner.settings.enforcement_settings().await;
        let _gate = self.inner.gate.lock().await;
        self.inner.apply_evaluation(&settings);
    }

    pub async fn on_video_started(&self, video_id: &str) {
        let flags = self.inner.settings.content_flags().await;
        let settings = self.inner.settings.enforcement_settings().await;
        let _gate = self.inner.gate.lock().await;
        let now = self.inner.clock.now();

        let events = if flags.video_enabled(video_id) == Some(false) {
            let state = self.inner.state().state;
            warn!(video_id, "ignoring start of a video locked by parent");
            vec![Event::TransitionIgnored {
                action: "video_started".into(),
                state,
                at: now.with_timezone(&Utc),
            }]
        } else {
            self.inner.with_engine(|e| e.on_video_started(video_id, now))
        };
        self.inner.commit(events, now);
        self.inner.apply_evaluation(&settings);
    }

    /// Ending the video that ran past the quota closes the session and stays
    /// `Locked`; any other end re-evaluates.
    pub async fn on_video_ended(&self) {
        let settings = self.inner.settings.enforcement_settings().await;
        let _gate = self.inner.gate.lock().await;
        let now = self.inner.clock.now();
        let (events, session_closed) = self.inner.with_engine(|e| {
            let finishing = matches!(
                e.state(),
                ViewingState::SoftOffWarning | ViewingState::FinishingVideo
            );
            (e.on_video_ended(now), finishing)
        });
        self.inner.commit(events, now);
        if !session_closed {
            self.inner.apply_evaluation(&settings);
        }
    }

    pub async fn dismiss_soft_off_warning(&self) {
        let _gate = self.inner.gate.lock().await;
        let now = self.inner.clock.now();
        let events = self.inner.with_engine(|e| e.dismiss_soft_off_warning(now));
        self.inner.commit(events, now);
    }

    /// A synced lock disabled `video_id`.
    pub async fn on_content_locked(&self, video_id: &str, allow_finish: bool, warning_minutes: u32) {
        let settings = self.inner.settings.enforcement_settings().await;
        let _gate = self.inner.gate.lock().await;
        let now = self.inner.clock.now();
        let events = self
            .inner
            .with_engine(|e| e.on_content_locked(video_id, allow_finish, warning_minutes, now));
        self.inner.commit(events, now);
        self.inner.apply_evaluation(&settings);
    }

    /// A synced unlock re-enabled `video_id`; a pending interrupt of it is
    /// dropped.
    pub async fn on_content_unlocked(&self, video_id: &str) {
        let settings = self.inner.settings.enforcement_settings().await;
        let _gate = self.inner.gate.lock().await;
        self.inner.with_engine(|e| e.on_content_unlocked(video_id));
        self.inner.apply_evaluation(&settings);
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        self.inner.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.inner.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.events_tx.subscribe()
    }

    pub fn current_schedule_result(&self) -> Option<ScheduleResult> {
        self.inner.result_tx.borrow().clone()
    }

    pub fn can_start_video(&self) -> bool {
        matches!(self.state().state, ViewingState::Active | ViewingState::Watching)
    }

    pub fn can_browse_content(&self) -> bool {
        matches!(self.state().state, ViewingState::Active | ViewingState::Watching)
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        if let Some(TickTask { stop_tx, task }) = lock(&self.ticker).take() {
            let _ = stop_tx.send(true);
            task.abort();
        }
    }
}

impl Inner {
    async fn tick(&self) -> bool {
        let settings = self.settings.enforcement_settings().await;
        let Ok(_gate) = self.gate.try_lock() else {
            debug!("skipping tick, transition in flight");
            return false;
        };
        self.apply_evaluation(&settings);
        true
    }

    /// Caller holds the gate.
    fn apply_evaluation(&self, settings: &EnforcementSettings) {
        let now = self.clock.now();
        let result = schedule::evaluate(settings, &self.device_id, now.naive_local());
        let events = self.with_engine(|e| e.evaluate(&result, settings.is_soft_off_enabled, now));
        self.result_tx.send_replace(Some(result));
        self.commit(events, now);
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut ViewingTimer) -> T) -> T {
        f(&mut lock(&self.engine))
    }

    fn state(&self) -> TimerState {
        self.state_tx.borrow().clone()
    }

    /// Publish the engine snapshot and any events. Caller holds the gate.
    fn commit(&self, events: Vec<Event>, now: DateTime<FixedOffset>) {
        let snapshot = lock(&self.engine).snapshot();
        let previous_total = self.state_tx.borrow().total_watched_minutes;
        if previous_total != snapshot.total_watched_minutes {
            self.persist(snapshot.total_watched_minutes, now);
        }

        self.state_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        for event in events {
            // No subscribers is fine.
            let _ = self.events_tx.send(event);
        }
    }

    fn persist(&self, total_watched_minutes: u32, now: DateTime<FixedOffset>) {
        let Some(store) = &self.sessions else {
            return;
        };
        let record = SessionRecord {
            total_watched_minutes,
            session_date: now.date_naive(),
            updated_at: now.with_timezone(&Utc),
        };
        if let Err(e) = store.save_session(&record) {
            warn!(error = %e, "failed to persist watched minutes");
        }
    }
}

async fn tick_loop(inner: Weak<Inner>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = time::interval(interval);
    // A stalled device must not replay missed ticks.
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

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.tick().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::content::ContentFlags;
    use crate::settings::{EnforcementSettings, Schedule, Weekdays};
    use async_trait::async_trait;
    use chrono::TimeZone;

    #[derive(Default)]
    struct FixedSettings {
        settings: Mutex<EnforcementSettings>,
        flags: Mutex<ContentFlags>,
    }

    #[async_trait]
    impl SettingsSource for FixedSettings {
        async fn enforcement_settings(&self) -> EnforcementSettings {
            lock(&self.settings).clone()
        }

        async fn content_flags(&self) -> ContentFlags {
            lock(&self.flags).clone()
        }
    }

    #[derive(Default)]
    struct MemorySessions(Mutex<Option<SessionRecord>>);

    impl SessionStore for MemorySessions {
        fn load_session(&self) -> Result<Option<SessionRecord>, crate::error::CacheError> {
            Ok(lock(&self.0).clone())
        }
        fn save_session(&self, record: &SessionRecord) -> Result<(), crate::error::CacheError> {
            *lock(&self.0) = Some(record.clone());
            Ok(())
        }
        fn clear_session(&self) -> Result<(), crate::error::CacheError> {
            *lock(&self.0) = None;
            Ok(())
        }
    }

    fn tuesday_nine() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 3, 9, 0, 0)
            .unwrap()
    }

    fn school_days(max: Option<u32>) -> EnforcementSettings {
        EnforcementSettings {
            schedules: vec![Schedule {
                max_viewing_minutes: max,
                ..Schedule::new("s1", Weekdays::WEEKDAYS, "08:00", "20:00")
            }],
            ..EnforcementSettings::default()
        }
    }

    fn service(
        settings: EnforcementSettings,
    ) -> (TimerService, Arc<FixedSettings>, Arc<ManualClock>) {
        let source = Arc::new(FixedSettings {
            settings: Mutex::new(settings),
            ..FixedSettings::default()
        });
        let clock = Arc::new(ManualClock::new(tuesday_nine()));
        let svc = TimerService::builder("tablet-1", source.clone(), clock.clone()).build();
        (svc, source, clock)
    }

    #[tokio::test]
    async fn evaluate_publishes_state_and_result() {
        let (svc, _, _) = service(school_days(Some(60)));
        assert_eq!(svc.state().state, ViewingState::Locked);
        assert!(svc.current_schedule_result().is_none());

        svc.evaluate().await;
        assert_eq!(svc.state().state, ViewingState::Active);
        assert_eq!(svc.state().remaining_minutes, Some(60));
        assert!(svc.current_schedule_result().is_some_and(|r| r.is_allowed));
        assert!(svc.can_start_video());
        assert!(svc.can_browse_content());
    }

    #[tokio::test]
    async fn tick_is_skipped_while_transition_in_flight() {
        let (svc, _, _) = service(school_days(None));
        let gate = svc.inner.gate.lock().await;
        assert!(!svc.tick().await);
        assert_eq!(svc.state().state, ViewingState::Locked);
        drop(gate);
        assert!(svc.tick().await);
        assert_eq!(svc.state().state, ViewingState::Active);
    }

    #[tokio::test]
    async fn locked_flag_blocks_video_start() {
        let (svc, source, _) = service(school_days(None));
        lock(&source.flags).videos.insert("v1".into(), false);
        svc.evaluate().await;
        let mut events = svc.events();

        svc.on_video_started("v1").await;
        assert_eq!(svc.state().state, ViewingState::Active);
        assert!(matches!(
            events.try_recv(),
            Ok(Event::TransitionIgnored { .. })
        ));
    }

    #[tokio::test]
    async fn video_end_re_evaluates_into_active() {
        let (svc, _, clock) = service(school_days(Some(60)));
        svc.evaluate().await;
        svc.on_video_started("v1").await;
        assert_eq!(svc.state().state, ViewingState::Watching);
        assert_eq!(svc.state().current_video_id.as_deref(), Some("v1"));

        clock.advance(chrono::Duration::minutes(7));
        svc.on_video_ended().await;
        let state = svc.state();
        assert_eq!(state.state, ViewingState::Active);
        assert_eq!(state.total_watched_minutes, 7);
        assert_eq!(state.remaining_minutes, Some(53));
    }

    #[tokio::test]
    async fn settings_change_locks_on_next_tick() {
        let (svc, source, _) = service(school_days(None));
        svc.evaluate().await;
        svc.on_video_started("v1").await;

        lock(&source.settings).is_device_revoked = true;
        svc.tick().await;
        let state = svc.state();
        assert_eq!(state.state, ViewingState::Locked);
        assert_eq!(state.reason.as_deref(), Some("device revoked"));
        assert!(!svc.can_start_video());
    }

    #[tokio::test]
    async fn session_is_persisted_and_restored_same_day() {
        let store = Arc::new(MemorySessions::default());
        let source = Arc::new(FixedSettings {
            settings: Mutex::new(school_days(Some(60))),
            ..FixedSettings::default()
        });
        let clock = Arc::new(ManualClock::new(tuesday_nine()));

        let svc = TimerService::builder("tablet-1", source.clone(), clock.clone())
            .session_store(store.clone())
            .build();
        svc.evaluate().await;
        svc.on_video_started("v1").await;
        clock.advance(chrono::Duration::minutes(12));
        svc.on_video_ended().await;
        drop(svc);

        let restarted = TimerService::builder("tablet-1", source.clone(), clock.clone())
            .session_store(store.clone())
            .build();
        assert_eq!(restarted.state().total_watched_minutes, 12);

        clock.advance(chrono::Duration::days(1));
        let next_day = TimerService::builder("tablet-1", source, clock)
            .session_store(store.clone())
            .build();
        assert_eq!(next_day.state().total_watched_minutes, 0);
        assert!(lock(&store.0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_loop_runs_until_shutdown() {
        let (svc, _, _) = service(school_days(None));
        let mut rx = svc.subscribe();
        svc.start();
        assert!(svc.is_running());

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("first tick fires immediately")
            .unwrap();
        assert_eq!(svc.state().state, ViewingState::Active);

        svc.shutdown().await;
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn unlock_keeps_warned_video_playing() {
        let (svc, _, clock) = service(school_days(None));
        svc.evaluate().await;
        svc.on_video_started("v1").await;
        svc.on_content_locked("v1", false, 3).await;

        clock.advance(chrono::Duration::minutes(1));
        svc.on_content_unlocked("v1").await;
        clock.advance(chrono::Duration::minutes(5));
        svc.tick().await;
        assert_eq!(svc.state().state, ViewingState::Watching);
        assert_eq!(svc.state().current_video_id.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn quota_lock_lifts_on_next_day_and_is_persisted() {
        let store = Arc::new(MemorySessions::default());
        let source = Arc::new(FixedSettings {
            settings: Mutex::new(EnforcementSettings {
                is_soft_off_enabled: false,
                ..school_days(Some(30))
            }),
            ..FixedSettings::default()
        });
        let clock = Arc::new(ManualClock::new(tuesday_nine()));
        let svc = TimerService::builder("tablet-1", source, clock.clone())
            .session_store(store.clone())
            .build();

        svc.evaluate().await;
        svc.on_video_started("v1").await;
        clock.advance(chrono::Duration::minutes(30));
        svc.tick().await;
        assert_eq!(svc.state().state, ViewingState::Locked);
        assert_eq!(svc.state().total_watched_minutes, 30);

        clock.advance(chrono::Duration::days(1));
        svc.tick().await;
        let state = svc.state();
        assert_eq!(state.state, ViewingState::Active);
        assert_eq!(state.total_watched_minutes, 0);
        assert_eq!(state.remaining_minutes, Some(30));
        let record = lock(&store.0).clone().unwrap();
        assert_eq!(record.total_watched_minutes, 0);
        assert_eq!(record.session_date, clock.now().date_naive());
    }

    #[derive(Default)]
    struct SlowSettings {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl SettingsSource for SlowSettings {
        async fn enforcement_settings(&self) -> EnforcementSettings {
            self.entered.notify_one();
            self.release.notified().await;
            school_days(None)
        }
    }

    #[tokio::test]
    async fn gate_is_free_during_settings_read() {
        let source = Arc::new(SlowSettings::default());
        let clock = Arc::new(ManualClock::new(tuesday_nine()));
        let svc = Arc::new(TimerService::builder("tablet-1", source.clone(), clock).build());

        let pending = tokio::spawn({
            let svc = svc.clone();
            async move { svc.evaluate().await }
        });
        source.entered.notified().await;
        assert!(svc.inner.gate.try_lock().is_ok());

        source.release.notify_one();
        pending.await.unwrap();
        assert_eq!(svc.state().state, ViewingState::Active);
    }
}
