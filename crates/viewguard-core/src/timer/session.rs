use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Persisted watched-minutes accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub total_watched_minutes: u32,
    /// Local date the accumulator belongs to.
    pub session_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Minutes to restore on `today`; a record from another day counts as empty.
    pub fn minutes_for(&self, today: NaiveDate) -> Option<u32> {
        (self.session_date == today).then_some(self.total_watched_minutes)
    }
}

/// Durable home for the session accumulator, so a restart does not hand
/// back a fresh quota.
pub trait SessionStore: Send + Sync {
    fn load_session(&self) -> Result<Option<SessionRecord>, CacheError>;
    fn save_session(&self, record: &SessionRecord) -> Result<(), CacheError>;
    fn clear_session(&self) -> Result<(), CacheError>;
}
