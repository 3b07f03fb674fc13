//! Reference scenarios for the evaluator, limiter and dedup

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{at, items};
use kodegen_tools_pagewatch::{
    DedupAndPersist, ManualClock, MemoryStore, RateLimitConfig, RateLimiter, ScheduleEvaluator, ScheduleMode,
    ScheduleRule, TargetId, TimeOfDay,
};

fn t(s: &str) -> TimeOfDay {
    s.parse().expect("valid time of day")
}

#[test]
fn test_night_batched_day_frequent() {
    let rules = vec![
        ScheduleRule::batched(t("00:00"), t("08:00"), 1),
        ScheduleRule::frequent(t("08:00"), t("24:00"), 1, 60),
    ];
    let evaluator = ScheduleEvaluator::default();

    let day = evaluator.evaluate(&rules, at(9, 0));
    assert_eq!(day.mode, ScheduleMode::Frequent);
    assert_eq!(day.interval_secs, 60);

    let night = evaluator.evaluate(&rules, at(2, 0));
    assert_eq!(night.mode, ScheduleMode::BatchedSummary);
    assert_eq!(night.interval_secs, 6 * 3600, "deferred until the window ends");
}

#[test]
fn test_burst_of_two_then_refill() {
    let clock = Arc::new(ManualClock::new(at(9, 0)));
    let limiter = RateLimiter::new(clock.clone());
    limiter.register(
        "notify",
        RateLimitConfig {
            short_capacity: 2.0,
            short_rate_per_sec: 0.5,
            long_capacity: 30.0,
            long_rate_per_sec: 0.5 / 60.0,
        },
    );

    assert!(limiter.try_admit("notify"));
    assert!(limiter.try_admit("notify"));
    assert!(!limiter.try_admit("notify"));

    clock.advance(Duration::from_secs(2));
    assert!(limiter.try_admit("notify"));

    let stats = limiter.stats("notify").expect("registered");
    assert_eq!((stats.admitted, stats.denied), (3, 1));
}

#[tokio::test]
async fn test_ten_fetched_four_already_stored() {
    let store = Arc::new(MemoryStore::new());
    let target = TargetId::new("forum-7");
    store.preload(&target, items(&["1", "2", "3", "4"]));
    let dedup = DedupAndPersist::new(store.clone());

    let fetched = items(&["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]);
    let outcome = dedup.filter_and_store(&target, fetched).await.expect("memory store");

    assert_eq!(outcome.inserted_count, 6);
    assert_eq!(outcome.skipped_count, 4);
    assert_eq!(store.items(&target).len(), 10);
    assert_eq!(store.lookup_calls(), 1);
    assert_eq!(store.insert_calls(), 1);
}
