use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::ViewingState;

/// Every state change in the viewing timer produces an Event.
/// The UI subscribes to them; the published [`crate::timer::TimerState`]
/// snapshot carries the same information in sampled form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    StateChanged {
        from: ViewingState,
        to: ViewingState,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    /// Quota ran out mid-video with soft-off enabled; the video keeps playing.
    SoftOffWarning {
        video_id: Option<String>,
        watched_minutes: u32,
        at: DateTime<Utc>,
    },
    VideoStarted {
        video_id: String,
        at: DateTime<Utc>,
    },
    VideoEnded {
        video_id: Option<String>,
        watched_minutes: u32,
        total_watched_minutes: u32,
        at: DateTime<Utc>,
    },
    /// A parent lock on the playing video will stop it at `interrupt_at`.
    LockWarning {
        video_id: String,
        interrupt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    PlaybackInterrupted {
        video_id: String,
        watched_minutes: u32,
        reason: String,
        at: DateTime<Utc>,
    },
    /// An imperative call arrived in a state that does not accept it.
    TransitionIgnored {
        action: String,
        state: ViewingState,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = Event::StateChanged {
            from: ViewingState::Locked,
            to: ViewingState::Active,
            reason: None,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StateChanged");
        assert_eq!(json["to"], "active");
    }
}
