//! Parent-side lock writer.
//!
//! Computes the full closure first, then commits every flag and command
//! record in one atomic batch. A failed batch is retried whole, never
//! resumed, and only for errors that may clear on their own.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::cascade::{write_target, CascadeClosure};
use super::command::{LockCommand, LockTarget};
use super::store::{RemoteStore, WriteBatch};
use super::{load_collections, load_videos};
use crate::clock::Clock;
use crate::config::LockConfig;
use crate::error::LockError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Multiplied by the attempt number before each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&LockConfig> for RetryPolicy {
    fn from(config: &LockConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// What a committed lock touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub target: LockTarget,
    pub is_locked: bool,
    pub seasons: Vec<String>,
    pub videos: Vec<String>,
    pub attempts: u32,
}

impl CascadeReport {
    pub fn flag_writes(&self) -> usize {
        1 + self.seasons.len() + self.videos.len()
    }
}

pub struct LockPropagator {
    store: Arc<dyn RemoteStore>,
    principal: String,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl LockPropagator {
    pub fn new(store: Arc<dyn RemoteStore>, principal: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            principal: principal.into(),
            clock,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn command(
        &self,
        target: LockTarget,
        is_locked: bool,
        warning_minutes: u32,
        allow_finish: bool,
    ) -> LockCommand {
        LockCommand {
            target,
            is_locked,
            locked_by: self.principal.clone(),
            locked_at: self.clock.now().with_timezone(&Utc),
            warning_minutes,
            allow_finish_current_video: allow_finish,
            cascaded_from: None,
        }
    }

    /// Lock or unlock a collection together with its seasons and videos.
    ///
    /// # Errors
    /// `CollectionNotFound` when the target does not exist, `Read` when the
    /// content tree cannot be loaded, `Remote` when the batch did not commit.
    /// In every error case nothing has been written.
    pub async fn lock_collection(
        &self,
        collection_id: &str,
        is_locked: bool,
        warning_minutes: u32,
        allow_finish: bool,
    ) -> Result<CascadeReport, LockError> {
        let collections = load_collections(self.store.as_ref())
            .await
            .map_err(LockError::Read)?;
        let videos = load_videos(self.store.as_ref())
            .await
            .map_err(LockError::Read)?;
        let closure = CascadeClosure::compute(collection_id, &collections, &videos)
            .ok_or_else(|| LockError::CollectionNotFound(collection_id.to_owned()))?;

        let command = self.command(
            LockTarget::Collection(collection_id.to_owned()),
            is_locked,
            warning_minutes,
            allow_finish,
        );
        let batch = closure.to_batch(&command);
        info!(
            collection_id,
            is_locked,
            seasons = closure.seasons.len(),
            videos = closure.videos.len(),
            writes = batch.len(),
            "committing collection lock"
        );
        let attempts = self.commit(&batch).await?;

        Ok(CascadeReport {
            target: command.target,
            is_locked,
            seasons: closure.seasons.into_iter().map(|c| c.id).collect(),
            videos: closure.videos.into_iter().map(|v| v.id).collect(),
            attempts,
        })
    }

    /// Lock or unlock a single video.
    pub async fn lock_video(
        &self,
        video_id: &str,
        is_locked: bool,
        warning_minutes: u32,
        allow_finish: bool,
    ) -> Result<CascadeReport, LockError> {
        let target = LockTarget::Video(video_id.to_owned());
        let exists = self
            .store
            .read(&target.item_path())
            .await
            .map_err(LockError::Read)?
            .is_some();
        if !exists {
            return Err(LockError::VideoNotFound(video_id.to_owned()));
        }

        let command = self.command(target, is_locked, warning_minutes, allow_finish);
        let mut batch = WriteBatch::new();
        write_target(&mut batch, &command);
        info!(video_id, is_locked, "committing video lock");
        let attempts = self.commit(&batch).await?;

        Ok(CascadeReport {
            target: command.target,
            is_locked,
            seasons: Vec::new(),
            videos: Vec::new(),
            attempts,
        })
    }

    /// Submit `batch`, retrying it whole. Returns the attempt that succeeded.
    async fn commit(&self, batch: &WriteBatch) -> Result<u32, LockError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.update(batch).await {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.backoff * attempt;
                    warn!(attempt, max_attempts, error = %e, ?delay, "lock batch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "lock batch failed, nothing applied");
                    return Err(LockError::Remote {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}
