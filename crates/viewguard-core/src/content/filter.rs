//! Content filtering against a [`ScheduleResult`].
//!
//! Precedence for a video, first failing rule wins:
//!
//! 1. schedule denies -> nothing plays, the schedule's reason is reported
//! 2. the video (or the collection it is played from) is disabled by a lock
//! 3. the video is on the block list
//! 4. a non-empty video allow list is decisive on its own
//! 5. otherwise, a present collection allow list must name the collection

use std::fmt;

use super::{Collection, Video};
use crate::schedule::{ScheduleReason, ScheduleResult};

/// Why a video or collection is unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockedReason {
    Schedule(ScheduleReason),
    LockedByParent,
    VideoBlocked,
    NotInAllowedVideos,
    CollectionNotAllowed,
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockedReason::Schedule(reason) => write!(f, "{reason}"),
            BlockedReason::LockedByParent => f.write_str("locked by parent"),
            BlockedReason::VideoBlocked => f.write_str("this video is blocked"),
            BlockedReason::NotInAllowedVideos => f.write_str("this video is not on the allowed list"),
            BlockedReason::CollectionNotAllowed => {
                f.write_str("this collection is not allowed right now")
            }
        }
    }
}

fn collection_allowed(collection: &Collection, result: &ScheduleResult) -> bool {
    match &result.allowed_collections {
        Some(allowed) => allowed.matches(&collection.id, &collection.name),
        None => true,
    }
}

/// Collections the child may browse.
pub fn filter_collections<'a>(
    collections: &'a [Collection],
    result: &ScheduleResult,
) -> Vec<&'a Collection> {
    if !result.is_allowed {
        return Vec::new();
    }
    collections
        .iter()
        .filter(|c| c.enabled && collection_allowed(c, result))
        .collect()
}

/// Check one video played from `collection` (or from no particular
/// collection, in which case its membership ids are used).
pub fn check_video(
    video: &Video,
    collection: Option<&Collection>,
    result: &ScheduleResult,
) -> Result<(), BlockedReason> {
    if !result.is_allowed {
        return Err(BlockedReason::Schedule(result.reason.clone()));
    }
    if !video.enabled || collection.is_some_and(|c| !c.enabled) {
        return Err(BlockedReason::LockedByParent);
    }
    if let Some(blocked) = result.blocked_videos.as_ref().filter(|b| !b.is_empty()) {
        if blocked.matches(&video.id, &video.title) {
            return Err(BlockedReason::VideoBlocked);
        }
    }
    if let Some(allowed) = result.allowed_videos.as_ref().filter(|a| !a.is_empty()) {
        return if allowed.matches(&video.id, &video.title) {
            Ok(())
        } else {
            Err(BlockedReason::NotInAllowedVideos)
        };
    }

    let in_allowed_collection = match (&result.allowed_collections, collection) {
        (None, _) => true,
        (Some(_), Some(c)) => collection_allowed(c, result),
        (Some(allowed), None) => video.collection_ids.iter().any(|id| allowed.matches_id(id)),
    };
    if in_allowed_collection {
        Ok(())
    } else {
        Err(BlockedReason::CollectionNotAllowed)
    }
}

pub fn can_play_video(video: &Video, collection: Option<&Collection>, result: &ScheduleResult) -> bool {
    check_video(video, collection, result).is_ok()
}

/// User-facing message for why `video` cannot play, if it cannot.
pub fn blocked_reason(
    video: &Video,
    collection: Option<&Collection>,
    result: &ScheduleResult,
) -> Option<String> {
    check_video(video, collection, result)
        .err()
        .map(|r| r.to_string())
}

/// Videos from `collection` the child may play.
pub fn filter_videos<'a>(
    videos: &'a [Video],
    collection: Option<&Collection>,
    result: &ScheduleResult,
) -> Vec<&'a Video> {
    videos
        .iter()
        .filter(|v| can_play_video(v, collection, result))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ContentRefSet;

    fn allowed() -> ScheduleResult {
        ScheduleResult {
            is_allowed: true,
            active_schedule: None,
            reason: ScheduleReason::WithinSchedule("Afternoon".into()),
            max_viewing_minutes: None,
            allowed_collections: None,
            blocked_videos: None,
            allowed_videos: None,
        }
    }

    fn titles(videos: &[&Video]) -> Vec<String> {
        videos.iter().map(|v| v.title.clone()).collect()
    }

    #[test]
    fn denied_schedule_filters_everything() {
        let mut r = allowed();
        r.is_allowed = false;
        r.reason = ScheduleReason::OutsideSchedule;
        let videos = vec![Video::new("v1", "Frozen")];
        let cols = vec![Collection::new("c1", "Disney")];

        assert!(filter_videos(&videos, None, &r).is_empty());
        assert!(filter_collections(&cols, &r).is_empty());
        assert_eq!(
            blocked_reason(&videos[0], None, &r).as_deref(),
            Some("outside scheduled viewing time")
        );
    }

    #[test]
    fn allowed_collections_match_id_or_name() {
        let mut r = allowed();
        r.allowed_collections = Some(ContentRefSet::from_raw(["Disney", "c3"]));
        let cols = vec![
            Collection::new("c1", "Disney"),
            Collection::new("c2", "Horror"),
            Collection::new("c3", "Nature"),
        ];
        let names: Vec<_> = filter_collections(&cols, &r).iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Disney", "Nature"]);
    }

    #[test]
    fn membership_without_collection_context_matches_ids_only() {
        use crate::settings::ContentRef;

        let mut r = allowed();
        r.allowed_collections = Some(ContentRefSet::new(vec![ContentRef::Title("c1".into())]));
        let video = Video::new("v1", "Frozen").in_collection("c1");
        assert!(!can_play_video(&video, None, &r));

        r.allowed_collections = Some(ContentRefSet::new(vec![ContentRef::Id("c1".into())]));
        assert!(can_play_video(&video, None, &r));
        r.allowed_collections = Some(ContentRefSet::from_raw(["c1"]));
        assert!(can_play_video(&video, None, &r));
    }

    #[test]
    fn present_but_empty_collection_list_allows_nothing() {
        let mut r = allowed();
        r.allowed_collections = Some(ContentRefSet::default());
        let cols = vec![Collection::new("c1", "Disney")];
        assert!(filter_collections(&cols, &r).is_empty());
    }

    #[test]
    fn block_list_matches_id_or_title() {
        let mut r = allowed();
        r.blocked_videos = Some(ContentRefSet::from_raw(["Moana", "v3"]));
        let videos = vec![
            Video::new("v1", "Frozen"),
            Video::new("v2", "Moana"),
            Video::new("v3", "Cars"),
        ];
        assert_eq!(titles(&filter_videos(&videos, None, &r)), vec!["Frozen"]);
        assert_eq!(
            blocked_reason(&videos[1], None, &r).as_deref(),
            Some("this video is blocked")
        );
    }

    #[test]
    fn allow_list_is_decisive_regardless_of_collections() {
        let mut r = allowed();
        r.allowed_videos = Some(ContentRefSet::from_raw(["Frozen"]));
        r.blocked_videos = Some(ContentRefSet::default());
        r.allowed_collections = Some(ContentRefSet::from_raw(["Nature"]));
        let disney = Collection::new("c1", "Disney");
        let videos = vec![
            Video::new("v1", "Frozen").in_collection("c1"),
            Video::new("v2", "Moana").in_collection("c1"),
        ];

        assert_eq!(titles(&filter_videos(&videos, Some(&disney), &r)), vec!["Frozen"]);
        assert_eq!(titles(&filter_videos(&videos, None, &r)), vec!["Frozen"]);
    }

    #[test]
    fn block_list_beats_allow_list() {
        let mut r = allowed();
        r.allowed_videos = Some(ContentRefSet::from_raw(["Frozen"]));
        r.blocked_videos = Some(ContentRefSet::from_raw(["v1"]));
        let frozen = Video::new("v1", "Frozen");
        assert_eq!(check_video(&frozen, None, &r), Err(BlockedReason::VideoBlocked));
    }

    #[test]
    fn collection_allowance_uses_context_or_membership() {
        let mut r = allowed();
        r.allowed_collections = Some(ContentRefSet::from_raw(["Disney"]));
        let disney = Collection::new("c1", "Disney");
        let other = Collection::new("c2", "Horror");
        let video = Video::new("v1", "Frozen").in_collection("c1");

        assert!(can_play_video(&video, Some(&disney), &r));
        assert_eq!(
            check_video(&video, Some(&other), &r),
            Err(BlockedReason::CollectionNotAllowed)
        );
        // Without context only ids are known; "Disney" is a name, so no match.
        assert!(!can_play_video(&video, None, &r));
        r.allowed_collections = Some(ContentRefSet::from_raw(["c1"]));
        assert!(can_play_video(&video, None, &r));
    }

    #[test]
    fn disabled_flags_lock_video_and_collection() {
        let r = allowed();
        let mut video = Video::new("v1", "Frozen");
        video.enabled = false;
        assert_eq!(check_video(&video, None, &r), Err(BlockedReason::LockedByParent));

        let mut locked_show = Collection::new("c1", "Bluey");
        locked_show.enabled = false;
        let ep = Video::new("v2", "Keepy Uppy");
        assert!(!can_play_video(&ep, Some(&locked_show), &r));
        assert!(filter_collections(&[locked_show], &r).is_empty());
    }
}
