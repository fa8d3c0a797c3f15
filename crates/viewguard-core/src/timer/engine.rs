//! Viewing timer state machine.
//!
//! The engine is a pure transition function over injected timestamps and a
//! [`ScheduleResult`]. It does not read the clock, touch I/O or spawn
//! anything; [`super::TimerService`] owns the tick loop and serialization.
//!
//! ## State Transitions
//!
//! ```text
//! Locked -> Active -> Watching -> SoftOffWarning -> FinishingVideo -> Locked
//!             ^          |
//!             +----------+  (video ended, quota left)
//! ```
//!
//! Schedule denial (revoked, disabled, outside window) forces `Locked` from
//! any state. Running out of quota locks immediately except while a video
//! plays with soft-off enabled, in which case the video may finish.
//!
//! The accumulator belongs to one local day. The first evaluation on a later
//! date starts a fresh quota.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::Event;
use crate::schedule::ScheduleResult;

const QUOTA_REASON: &str = "viewing time used up";
const PARENT_LOCK_REASON: &str = "locked by parent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewingState {
    Locked,
    Active,
    Watching,
    SoftOffWarning,
    FinishingVideo,
}

impl ViewingState {
    /// States in which a video is (or may be) on screen.
    pub fn is_playing(self) -> bool {
        matches!(
            self,
            ViewingState::Watching | ViewingState::SoftOffWarning | ViewingState::FinishingVideo
        )
    }
}

/// Read-only snapshot published to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerState {
    pub state: ViewingState,
    pub total_watched_minutes: u32,
    pub current_video_id: Option<String>,
    pub remaining_minutes: Option<u32>,
    pub schedule_label: Option<String>,
    /// Why the timer is locked, when it is.
    pub reason: Option<String>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            state: ViewingState::Locked,
            total_watched_minutes: 0,
            current_video_id: None,
            remaining_minutes: None,
            schedule_label: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Playback {
    video_id: String,
    started_at: DateTime<FixedOffset>,
    interrupt_at: Option<DateTime<FixedOffset>>,
}

impl Playback {
    /// Whole minutes since start; partial minutes are truncated.
    fn elapsed_minutes(&self, now: DateTime<FixedOffset>) -> u32 {
        let secs = (now - self.started_at).num_seconds().max(0);
        u32::try_from(secs / 60).unwrap_or(u32::MAX)
    }
}

/// Core viewing timer.
#[derive(Debug, Clone)]
pub struct ViewingTimer {
    state: ViewingState,
    total_watched_minutes: u32,
    /// Local date `total_watched_minutes` was accumulated on.
    session_date: Option<NaiveDate>,
    playback: Option<Playback>,
    remaining_minutes: Option<u32>,
    schedule_label: Option<String>,
    reason: Option<String>,
}

impl Default for ViewingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewingTimer {
    /// Starts `Locked` with an empty session.
    pub fn new() -> Self {
        Self {
            state: ViewingState::Locked,
            total_watched_minutes: 0,
            session_date: None,
            playback: None,
            remaining_minutes: None,
            schedule_label: None,
            reason: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> ViewingState {
        self.state
    }

    pub fn total_watched_minutes(&self) -> u32 {
        self.total_watched_minutes
    }

    pub fn current_video_id(&self) -> Option<&str> {
        self.playback.as_ref().map(|p| p.video_id.as_str())
    }

    /// Watched minutes including the in-progress video.
    pub fn effective_minutes(&self, now: DateTime<FixedOffset>) -> u32 {
        let current = self
            .playback
            .as_ref()
            .map(|p| p.elapsed_minutes(now))
            .unwrap_or(0);
        self.total_watched_minutes.saturating_add(current)
    }

    pub fn snapshot(&self) -> TimerState {
        TimerState {
            state: self.state,
            total_watched_minutes: self.total_watched_minutes,
            current_video_id: self.current_video_id().map(str::to_owned),
            remaining_minutes: self.remaining_minutes,
            schedule_label: self.schedule_label.clone(),
            reason: self.reason.clone(),
        }
    }

    /// Seed the accumulator from a persisted session of `date`.
    pub fn restore_watched_minutes(&mut self, minutes: u32, date: NaiveDate) {
        self.total_watched_minutes = minutes;
        self.session_date = Some(date);
    }

    // ── Tick ─────────────────────────────────────────────────────────

    /// Re-derive state from a fresh schedule result.
    pub fn evaluate(
        &mut self,
        result: &ScheduleResult,
        soft_off_enabled: bool,
        now: DateTime<FixedOffset>,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        self.roll_over(now);

        let interrupt_due = self
            .playback
            .as_ref()
            .and_then(|p| p.interrupt_at)
            .is_some_and(|deadline| now >= deadline);
        if interrupt_due {
            events.extend(self.interrupt_playback(PARENT_LOCK_REASON, now));
        }

        if !result.is_allowed {
            // Hard interrupt: overrides any playing state.
            self.schedule_label = None;
            self.remaining_minutes = None;
            if self.playback.is_some() {
                events.extend(self.stop_playback(now));
            }
            let reason = result.reason.to_string();
            if self.state != ViewingState::Locked {
                events.push(self.transition(ViewingState::Locked, Some(reason), now));
            } else {
                self.reason = Some(reason);
            }
            return events;
        }

        self.schedule_label = result.schedule_label().map(str::to_owned);
        let watched = self.effective_minutes(now);

        match result.max_viewing_minutes {
            Some(max) if watched >= max => match self.state {
                ViewingState::Watching if soft_off_enabled => {
                    events.push(self.transition(ViewingState::SoftOffWarning, None, now));
                    events.push(Event::SoftOffWarning {
                        video_id: self.current_video_id().map(str::to_owned),
                        watched_minutes: watched,
                        at: now.with_timezone(&Utc),
                    });
                }
                ViewingState::Watching => {
                    events.extend(self.stop_playback(now));
                    events.push(self.transition(
                        ViewingState::Locked,
                        Some(QUOTA_REASON.into()),
                        now,
                    ));
                }
                ViewingState::SoftOffWarning | ViewingState::FinishingVideo => {}
                ViewingState::Active => {
                    events.push(self.transition(
                        ViewingState::Locked,
                        Some(QUOTA_REASON.into()),
                        now,
                    ));
                }
                ViewingState::Locked => {
                    self.reason = Some(QUOTA_REASON.into());
                }
            },
            _ => {
                if self.state == ViewingState::Locked {
                    events.push(self.transition(ViewingState::Active, None, now));
                }
            }
        }

        let watched = self.effective_minutes(now);
        self.remaining_minutes = result
            .max_viewing_minutes
            .map(|max| max.saturating_sub(watched));
        events
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Legal from `Active` and `Watching`; ignored (and logged) otherwise.
    pub fn on_video_started(&mut self, video_id: &str, now: DateTime<FixedOffset>) -> Vec<Event> {
        match self.state {
            ViewingState::Active | ViewingState::Watching => {
                let mut events = Vec::new();
                if self.playback.is_some() {
                    events.extend(self.stop_playback(now));
                }
                self.playback = Some(Playback {
                    video_id: video_id.to_owned(),
                    started_at: now,
                    interrupt_at: None,
                });
                if self.state != ViewingState::Watching {
                    events.push(self.transition(ViewingState::Watching, None, now));
                }
                events.push(Event::VideoStarted {
                    video_id: video_id.to_owned(),
                    at: now.with_timezone(&Utc),
                });
                events
            }
            state => vec![self.ignored("video_started", state, now)],
        }
    }

    /// Credit elapsed minutes for the current video. Ending a video during
    /// soft-off closes the session: `Locked` with counters reset.
    pub fn on_video_ended(&mut self, now: DateTime<FixedOffset>) -> Vec<Event> {
        let mut events = self.stop_playback(now);
        if events.is_empty() {
            debug!(state = ?self.state, "video ended with no video playing");
        }
        events.extend(self.after_playback_stopped(now));
        events
    }

    /// Legal only from `SoftOffWarning`; no-op otherwise.
    pub fn dismiss_soft_off_warning(&mut self, now: DateTime<FixedOffset>) -> Vec<Event> {
        if self.state == ViewingState::SoftOffWarning {
            vec![self.transition(ViewingState::FinishingVideo, None, now)]
        } else {
            debug!(state = ?self.state, "soft-off warning dismissed outside warning state");
            Vec::new()
        }
    }

    /// A parent lock reached the video currently playing.
    pub fn on_content_locked(
        &mut self,
        video_id: &str,
        allow_finish: bool,
        warning_minutes: u32,
        now: DateTime<FixedOffset>,
    ) -> Vec<Event> {
        if self.current_video_id() != Some(video_id) {
            return Vec::new();
        }
        if allow_finish {
            info!(video_id, "locked video may finish");
            return Vec::new();
        }
        if warning_minutes == 0 {
            return self.interrupt_playback(PARENT_LOCK_REASON, now);
        }

        let deadline = now + Duration::minutes(i64::from(warning_minutes));
        let Some(playback) = self.playback.as_mut() else {
            return Vec::new();
        };
        if playback.interrupt_at.is_some_and(|d| d <= deadline) {
            return Vec::new();
        }
        playback.interrupt_at = Some(deadline);
        info!(video_id, %deadline, "playback will be interrupted by parent lock");
        vec![Event::LockWarning {
            video_id: video_id.to_owned(),
            interrupt_at: deadline.with_timezone(&Utc),
            at: now.with_timezone(&Utc),
        }]
    }

    /// The parent re-enabled `video_id`. Cancels a pending interrupt of the
    /// playing video; returns whether one was pending.
    pub fn on_content_unlocked(&mut self, video_id: &str) -> bool {
        let Some(playback) = self
            .playback
            .as_mut()
            .filter(|p| p.video_id == video_id)
        else {
            return false;
        };
        match playback.interrupt_at.take() {
            Some(deadline) => {
                info!(video_id, %deadline, "parent lock lifted, interrupt cancelled");
                true
            }
            None => false,
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Start a fresh accumulator when `now` falls on a later local date.
    /// A video playing across midnight only counts from midnight.
    fn roll_over(&mut self, now: DateTime<FixedOffset>) {
        let today = now.date_naive();
        if let Some(date) = self.session_date.filter(|d| *d < today) {
            info!(%date, %today, minutes = self.total_watched_minutes, "new viewing day, quota reset");
            self.total_watched_minutes = 0;
            if let Some(playback) = self.playback.as_mut() {
                let midnight = now - Duration::seconds(i64::from(now.num_seconds_from_midnight()));
                playback.started_at = playback.started_at.max(midnight);
            }
        }
        self.session_date = Some(self.session_date.map_or(today, |d| d.max(today)));
    }

    fn interrupt_playback(&mut self, reason: &str, now: DateTime<FixedOffset>) -> Vec<Event> {
        let Some(playback) = self.playback.take() else {
            return Vec::new();
        };
        let minutes = playback.elapsed_minutes(now);
        self.total_watched_minutes = self.total_watched_minutes.saturating_add(minutes);
        let mut events = vec![Event::PlaybackInterrupted {
            video_id: playback.video_id,
            watched_minutes: minutes,
            reason: reason.to_owned(),
            at: now.with_timezone(&Utc),
        }];
        events.extend(self.after_playback_stopped(now));
        events
    }

    /// Stop the current video (if any) and credit its whole minutes.
    fn stop_playback(&mut self, now: DateTime<FixedOffset>) -> Vec<Event> {
        let Some(playback) = self.playback.take() else {
            return Vec::new();
        };
        let minutes = playback.elapsed_minutes(now);
        self.total_watched_minutes = self.total_watched_minutes.saturating_add(minutes);
        vec![Event::VideoEnded {
            video_id: Some(playback.video_id),
            watched_minutes: minutes,
            total_watched_minutes: self.total_watched_minutes,
            at: now.with_timezone(&Utc),
        }]
    }

    fn after_playback_stopped(&mut self, now: DateTime<FixedOffset>) -> Vec<Event> {
        match self.state {
            ViewingState::SoftOffWarning | ViewingState::FinishingVideo => {
                let event = self.transition(ViewingState::Locked, Some(QUOTA_REASON.into()), now);
                self.total_watched_minutes = 0;
                self.remaining_minutes = None;
                vec![event]
            }
            ViewingState::Watching => vec![self.transition(ViewingState::Active, None, now)],
            ViewingState::Active | ViewingState::Locked => Vec::new(),
        }
    }

    fn transition(
        &mut self,
        to: ViewingState,
        reason: Option<String>,
        now: DateTime<FixedOffset>,
    ) -> Event {
        let from = self.state;
        info!(?from, ?to, reason = reason.as_deref().unwrap_or(""), "viewing state changed");
        self.state = to;
        self.reason = if to == ViewingState::Locked {
            reason.clone()
        } else {
            None
        };
        Event::StateChanged {
            from,
            to,
            reason,
            at: now.with_timezone(&Utc),
        }
    }

    fn ignored(&self, action: &str, state: ViewingState, now: DateTime<FixedOffset>) -> Event {
        warn!(action, ?state, "ignoring transition not allowed in current state");
        Event::TransitionIgnored {
            action: action.to_owned(),
            state,
            at: now.with_timezone(&Utc),
        }
    }
}
