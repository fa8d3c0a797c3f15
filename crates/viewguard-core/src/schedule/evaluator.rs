use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::settings::{day_and_time, ContentRefSet, EnforcementSettings, Schedule};

/// Why viewing is allowed or denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum ScheduleReason {
    DeviceRevoked,
    AppDisabled,
    OutsideSchedule,
    WithinSchedule(String),
}

impl fmt::Display for ScheduleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleReason::DeviceRevoked => f.write_str("device revoked"),
            ScheduleReason::AppDisabled => f.write_str("app disabled"),
            ScheduleReason::OutsideSchedule => f.write_str("outside scheduled viewing time"),
            ScheduleReason::WithinSchedule(label) => write!(f, "within schedule: {label}"),
        }
    }
}

/// Outcome of evaluating the settings at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub is_allowed: bool,
    pub active_schedule: Option<Schedule>,
    pub reason: ScheduleReason,
    pub max_viewing_minutes: Option<u32>,
    pub allowed_collections: Option<ContentRefSet>,
    pub blocked_videos: Option<ContentRefSet>,
    pub allowed_videos: Option<ContentRefSet>,
}

impl ScheduleResult {
    fn deny(reason: ScheduleReason) -> Self {
        Self {
            is_allowed: false,
            active_schedule: None,
            reason,
            max_viewing_minutes: None,
            allowed_collections: None,
            blocked_videos: None,
            allowed_videos: None,
        }
    }

    pub fn schedule_label(&self) -> Option<&str> {
        self.active_schedule.as_ref().map(|s| s.label.as_str())
    }
}

/// Decide whether `device_id` may view content at local time `now`.
///
/// Checks run in order and stop at the first decisive one: revoked device,
/// disabled app, then the first active schedule (in list order) covering
/// today, this device and the current minute.
pub fn evaluate(
    settings: &EnforcementSettings,
    device_id: &str,
    now: NaiveDateTime,
) -> ScheduleResult {
    if settings.is_device_revoked {
        return ScheduleResult::deny(ScheduleReason::DeviceRevoked);
    }
    if !settings.is_app_enabled {
        return ScheduleResult::deny(ScheduleReason::AppDisabled);
    }

    let (day, time) = day_and_time(&now);
    let matched = settings.schedules.iter().find(|s| {
        if !s.is_active || !s.days_of_week.contains(day) || !s.applies_to(device_id) {
            return false;
        }
        match s.window() {
            Some((start, end)) => time.within(start, end),
            None => {
                warn!(
                    schedule = %s.id,
                    start = %s.start_time,
                    end = %s.end_time,
                    "skipping schedule with malformed time window"
                );
                false
            }
        }
    });

    let Some(schedule) = matched else {
        return ScheduleResult::deny(ScheduleReason::OutsideSchedule);
    };

    let device_override = settings.device_override.as_ref();
    let max_viewing_minutes = device_override
        .and_then(|o| o.max_viewing_minutes_override)
        .or(schedule.max_viewing_minutes);
    let allowed_collections = device_override
        .and_then(|o| o.allowed_collections_override.clone())
        .or_else(|| schedule.allowed_collections.clone());

    ScheduleResult {
        is_allowed: true,
        active_schedule: Some(schedule.clone()),
        reason: ScheduleReason::WithinSchedule(schedule.label.clone()),
        max_viewing_minutes,
        allowed_collections,
        blocked_videos: schedule.blocked_videos.clone(),
        allowed_videos: schedule.allowed_videos.clone(),
    }
}
