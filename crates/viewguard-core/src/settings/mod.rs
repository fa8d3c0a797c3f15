//! Enforcement settings model.
//!
//! [`RemoteSettings`] is what the parent side publishes for a whole family;
//! [`EnforcementSettings`] is the per-device snapshot the evaluator consumes.
//! The snapshot is rebuilt from the cache on every evaluation and has no
//! identity beyond "current".

mod content_ref;
mod window;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub use content_ref::{ContentRef, ContentRefSet};
pub use window::{day_and_time, DayEncoding, TimeOfDay, Weekdays};

/// A day/time window during which viewing is permitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub days_of_week: Weekdays,
    /// `"HH:MM"`; a start later than the end wraps past midnight.
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub max_viewing_minutes: Option<u32>,
    #[serde(default)]
    pub allowed_collections: Option<ContentRefSet>,
    #[serde(default)]
    pub blocked_videos: Option<ContentRefSet>,
    #[serde(default)]
    pub allowed_videos: Option<ContentRefSet>,
    /// Empty or absent applies to every device.
    #[serde(default)]
    pub applies_to_devices: Option<BTreeSet<String>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Schedule {
    /// Active schedule with no limits or lists, labelled with its id.
    pub fn new(
        id: impl Into<String>,
        days_of_week: Weekdays,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            days_of_week,
            start_time: start_time.into(),
            end_time: end_time.into(),
            max_viewing_minutes: None,
            allowed_collections: None,
            blocked_videos: None,
            allowed_videos: None,
            applies_to_devices: None,
            is_active: true,
        }
    }

    /// Parsed window, or `None` when either bound is malformed.
    pub fn window(&self) -> Option<(TimeOfDay, TimeOfDay)> {
        Some((
            TimeOfDay::parse(&self.start_time)?,
            TimeOfDay::parse(&self.end_time)?,
        ))
    }

    pub fn applies_to(&self, device_id: &str) -> bool {
        match &self.applies_to_devices {
            None => true,
            Some(devices) => devices.is_empty() || devices.contains(device_id),
        }
    }
}

/// A per-device exception that takes precedence over the matched schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceOverride {
    #[serde(default = "default_true")]
    pub app_enabled: bool,
    #[serde(default)]
    pub max_viewing_minutes_override: Option<u32>,
    #[serde(default)]
    pub allowed_collections_override: Option<ContentRefSet>,
    #[serde(default)]
    pub is_revoked: bool,
}

impl Default for DeviceOverride {
    fn default() -> Self {
        Self {
            app_enabled: true,
            max_viewing_minutes_override: None,
            allowed_collections_override: None,
            is_revoked: false,
        }
    }
}

/// Settings snapshot for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementSettings {
    pub is_app_enabled: bool,
    pub is_device_revoked: bool,
    pub is_soft_off_enabled: bool,
    #[serde(default)]
    pub device_override: Option<DeviceOverride>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

impl Default for EnforcementSettings {
    /// Permissive defaults for "no data yet": app enabled, nothing revoked,
    /// no schedules (so the evaluator denies as outside schedule).
    fn default() -> Self {
        Self {
            is_app_enabled: true,
            is_device_revoked: false,
            is_soft_off_enabled: true,
            device_override: None,
            schedules: Vec::new(),
        }
    }
}

/// Schedule as published remotely; days may use either encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSchedule {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub max_viewing_minutes: Option<u32>,
    #[serde(default)]
    pub allowed_collections: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_videos: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_videos: Option<Vec<String>>,
    #[serde(default)]
    pub applies_to_devices: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl RemoteSchedule {
    pub fn into_schedule(self, encoding: DayEncoding) -> Schedule {
        Schedule {
            id: self.id,
            label: self.label,
            days_of_week: Weekdays::decode(&self.days_of_week, encoding),
            start_time: self.start_time,
            end_time: self.end_time,
            max_viewing_minutes: self.max_viewing_minutes,
            allowed_collections: self.allowed_collections.map(ContentRefSet::from_raw),
            blocked_videos: self.blocked_videos.map(ContentRefSet::from_raw),
            allowed_videos: self.allowed_videos.map(ContentRefSet::from_raw),
            applies_to_devices: self
                .applies_to_devices
                .map(|d| d.into_iter().collect()),
            is_active: self.is_active,
        }
    }
}

/// Family-wide settings as the sync puller receives them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    #[serde(default = "default_true")]
    pub app_enabled: bool,
    #[serde(default = "default_true")]
    pub soft_off_enabled: bool,
    #[serde(default)]
    pub day_encoding: DayEncoding,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceOverride>,
    #[serde(default)]
    pub schedules: Vec<RemoteSchedule>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            app_enabled: true,
            soft_off_enabled: true,
            day_encoding: DayEncoding::default(),
            devices: BTreeMap::new(),
            schedules: Vec::new(),
        }
    }
}

impl RemoteSettings {
    /// Project the family settings onto one device.
    ///
    /// A missing device override is fail-open: the device is treated as
    /// enabled and not revoked.
    pub fn for_device(&self, device_id: &str) -> EnforcementSettings {
        let device_override = self.devices.get(device_id).cloned();
        let (override_enabled, revoked) = device_override
            .as_ref()
            .map(|o| (o.app_enabled, o.is_revoked))
            .unwrap_or((true, false));

        EnforcementSettings {
            is_app_enabled: self.app_enabled && override_enabled,
            is_device_revoked: revoked,
            is_soft_off_enabled: self.soft_off_enabled,
            device_override,
            schedules: self
                .schedules
                .iter()
                .cloned()
                .map(|s| s.into_schedule(self.day_encoding))
                .collect(),
        }
    }
}

fn default_true() -> bool {
    true
}
