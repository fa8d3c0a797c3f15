//! Integration tests for the parent-to-child lock protocol: atomic cascade
//! on the parent side, flag reconciliation and playback interruption on the
//! child side.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use serde_json::{json, Map, Value};
use viewguard_core::content::filter_videos;
use viewguard_core::lock::{LockDefaults, RetryPolicy};
use viewguard_core::settings::Weekdays;
use viewguard_core::{
    evaluate, Clock, EnforcementSettings, Event, LockError, LockPropagator, LockReconciler, ManualClock,
    MemoryRemoteStore, RemoteError, Schedule, SettingsCache, TimerService, Video, ViewingState,
};

const SEASONS: usize = 3;
const EPISODES_PER_SEASON: usize = 4;

fn tuesday_nine() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2026, 3, 3, 9, 0, 0)
        .unwrap()
}

/// One show with `SEASONS` seasons of `EPISODES_PER_SEASON` episodes, plus
/// an unrelated movie.
fn show_tree() -> Value {
    let mut collections = Map::new();
    let mut videos = Map::new();
    collections.insert("show".into(), json!({ "name": "Bluey" }));
    for s in 1..=SEASONS {
        let season_id = format!("s{s}");
        collections.insert(
            season_id.clone(),
            json!({ "name": format!("Season {s}"), "parentCollectionId": "show" }),
        );
        for e in 1..=EPISODES_PER_SEASON {
            videos.insert(
                format!("s{s}e{e}"),
                json!({ "title": format!("Episode {e}"), "collectionIds": [season_id] }),
            );
        }
    }
    collections.insert("movies".into(), json!({ "name": "Movies" }));
    videos.insert(
        "frozen".into(),
        json!({ "title": "Frozen", "collectionIds": ["movies"] }),
    );
    json!({ "collections": collections, "videos": videos })
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(tuesday_nine()))
}

fn flag_paths() -> Vec<String> {
    let mut paths = vec!["collections/show/enabled".to_string()];
    for s in 1..=SEASONS {
        paths.push(format!("collections/s{s}/enabled"));
        for e in 1..=EPISODES_PER_SEASON {
            paths.push(format!("videos/s{s}e{e}/enabled"));
        }
    }
    paths
}

#[tokio::test]
async fn test_show_lock_writes_one_plus_n_plus_m_flags() {
    let store = Arc::new(MemoryRemoteStore::new(show_tree()));
    let report = LockPropagator::new(store.clone(), "parent-1", clock())
        .lock_collection("show", true, 5, false)
        .await
        .unwrap();

    let expected = 1 + SEASONS + SEASONS * EPISODES_PER_SEASON;
    assert_eq!(report.flag_writes(), expected);
    assert_eq!(flag_paths().len(), expected);
    for path in flag_paths() {
        assert_eq!(store.get(&path), Some(json!(false)), "{path}");
    }
    assert_eq!(store.get("collections/movies/enabled"), None);
    assert_eq!(store.get("videos/frozen/enabled"), None);
    assert_eq!(store.update_calls(), 1);

    let records = store.get("lock_commands/videos").unwrap();
    assert_eq!(records.as_object().unwrap().len(), SEASONS * EPISODES_PER_SEASON);
}

#[tokio::test(start_paused = true)]
async fn test_failed_cascade_changes_nothing() {
    let store = Arc::new(MemoryRemoteStore::new(show_tree()));
    let before = store.snapshot();
    store.fail_next_updates(vec![RemoteError::Unavailable("offline".into()); 3]);

    let err = LockPropagator::new(store.clone(), "parent-1", clock())
        .with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: StdDuration::from_millis(100),
        })
        .lock_collection("show", true, 5, false)
        .await
        .unwrap_err();

    assert!(matches!(err, LockError::Remote { attempts: 3, .. }));
    assert_eq!(store.update_calls(), 3);
    assert_eq!(store.snapshot(), before);
    for path in flag_paths() {
        assert_eq!(store.get(&path), None, "{path} was written");
    }
}

#[tokio::test]
async fn test_unreadable_tree_writes_nothing() {
    let store = Arc::new(MemoryRemoteStore::new(show_tree()));
    store.fail_reads(RemoteError::Unauthorized);
    let err = LockPropagator::new(store.clone(), "parent-1", clock())
        .lock_collection("show", true, 5, false)
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Read(RemoteError::Unauthorized)));
    assert_eq!(store.update_calls(), 0);
}

async fn child_device(
    store: Arc<MemoryRemoteStore>,
    clock: Arc<ManualClock>,
) -> (Arc<TimerService>, Arc<SettingsCache>, LockReconciler) {
    let cache = Arc::new(SettingsCache::open_memory().unwrap());
    let settings = EnforcementSettings {
        schedules: vec![Schedule::new("always", Weekdays::ALL, "00:00", "23:59")],
        ..EnforcementSettings::default()
    };
    cache.store_settings(&settings, Utc::now()).unwrap();
    let timer = Arc::new(TimerService::builder("tablet-1", cache.clone(), clock).build());
    timer.evaluate().await;
    let reconciler = LockReconciler::new(store, cache.clone())
        .defaults(LockDefaults {
            warning_minutes: 5,
            allow_finish: true,
        })
        .notify(timer.clone());
    (timer, cache, reconciler)
}

#[tokio::test]
async fn test_lock_interrupts_playing_episode_after_warning() {
    let store = Arc::new(MemoryRemoteStore::new(show_tree()));
    let clock = clock();
    let (timer, cache, reconciler) = child_device(store.clone(), clock.clone()).await;
    reconciler.reconcile().await.unwrap();

    timer.on_video_started("s2e1").await;
    clock.advance(Duration::minutes(3));
    let mut events = timer.events();

    LockPropagator::new(store.clone(), "parent-1", clock.clone())
        .lock_collection("show", true, 2, false)
        .await
        .unwrap();
    let changes = reconciler.reconcile().await.unwrap();
    assert_eq!(changes.disabled_videos.len(), SEASONS * EPISODES_PER_SEASON);
    assert_eq!(cache.load_flags().unwrap().video_enabled("s2e1"), Some(false));

    // Warned, still playing.
    assert!(matches!(events.try_recv(), Ok(Event::LockWarning { .. })));
    assert_eq!(timer.state().state, ViewingState::Watching);

    clock.advance(Duration::minutes(2));
    timer.tick().await;
    let state = timer.state();
    assert_eq!(state.state, ViewingState::Active);
    assert_eq!(state.current_video_id, None);
    assert_eq!(state.total_watched_minutes, 5);

    // Locked episodes cannot be restarted; the movie still can.
    timer.on_video_started("s2e1").await;
    assert_eq!(timer.state().state, ViewingState::Active);
    timer.on_video_started("frozen").await;
    assert_eq!(timer.state().state, ViewingState::Watching);
}

#[tokio::test]
async fn test_unlock_before_deadline_keeps_video_playing() {
    let store = Arc::new(MemoryRemoteStore::new(show_tree()));
    let clock = clock();
    let (timer, cache, reconciler) = child_device(store.clone(), clock.clone()).await;
    let parent = LockPropagator::new(store.clone(), "parent-1", clock.clone());

    timer.on_video_started("frozen").await;
    parent.lock_video("frozen", true, 5, false).await.unwrap();
    reconciler.reconcile().await.unwrap();

    clock.advance(Duration::minutes(1));
    parent.lock_video("frozen", false, 0, true).await.unwrap();
    let changes = reconciler.reconcile().await.unwrap();
    assert_eq!(changes.enabled_videos, vec!["frozen".to_string()]);
    assert_eq!(cache.load_flags().unwrap().video_enabled("frozen"), Some(true));

    // Past the original deadline.
    clock.advance(Duration::minutes(5));
    timer.tick().await;
    let state = timer.state();
    assert_eq!(state.state, ViewingState::Watching);
    assert_eq!(state.current_video_id.as_deref(), Some("frozen"));
}

#[tokio::test]
async fn test_lock_with_allow_finish_lets_episode_end() {
    let store = Arc::new(MemoryRemoteStore::new(show_tree()));
    let clock = clock();
    let (timer, _cache, reconciler) = child_device(store.clone(), clock.clone()).await;

    timer.on_video_started("s1e1").await;
    LockPropagator::new(store.clone(), "parent-1", clock.clone())
        .lock_collection("s1", true, 0, true)
        .await
        .unwrap();
    reconciler.reconcile().await.unwrap();

    clock.advance(Duration::minutes(30));
    timer.tick().await;
    assert_eq!(timer.state().state, ViewingState::Watching);
    assert_eq!(timer.state().current_video_id.as_deref(), Some("s1e1"));
}

#[tokio::test]
async fn test_synced_flags_filter_content() {
    let store = Arc::new(MemoryRemoteStore::new(show_tree()));
    let clock = clock();
    let (_timer, cache, reconciler) = child_device(store.clone(), clock.clone()).await;

    LockPropagator::new(store.clone(), "parent-1", clock.clone())
        .lock_video("frozen", true, 0, false)
        .await
        .unwrap();
    reconciler.reconcile().await.unwrap();

    let mut videos = vec![
        Video::new("frozen", "Frozen").in_collection("movies"),
        Video::new("s1e1", "Episode 1").in_collection("s1"),
    ];
    cache.load_flags().unwrap().apply_to_videos(&mut videos);

    let settings = cache.load_settings().unwrap().unwrap().settings;
    let result = evaluate(&settings, "tablet-1", clock.now().naive_local());
    let playable: Vec<_> = filter_videos(&videos, None, &result)
        .into_iter()
        .map(|v| v.id.as_str())
        .collect();
    assert_eq!(playable, vec!["s1e1"]);
}
