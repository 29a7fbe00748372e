//! Integration tests for the lane orchestrator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use outbound_throttle::builders::{build_orchestrator, OrchestratorBuilder};
use outbound_throttle::config::{OrchestratorConfig, SchedulerConfig, DEFAULT_LANE};
use outbound_throttle::core::{task, BoxedTask, InMemoryAuditSink, LaneOrchestrator, SchedulerError};
use tokio::time::{sleep, Instant};

fn fast_orchestrator<const N: usize>(lanes: [(&str, usize); N]) -> LaneOrchestrator {
    OrchestratorBuilder::new()
        .rate(1000.0)
        .jitter_ms(0)
        .lanes(lanes)
        .build()
        .unwrap()
}

/// Tracks how many tasks are inside a lane at once.
#[derive(Clone, Default)]
struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    fn task(&self, value: usize, hold: Duration) -> BoxedTask<usize> {
        let gauge = self.clone();
        task(move || async move {
            let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
            gauge.peak.fetch_max(now, Ordering::SeqCst);
            sleep(hold).await;
            gauge.current.fetch_sub(1, Ordering::SeqCst);
            anyhow::Ok(value)
        })
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn test_lane_ceiling_never_exceeded() {
    let o = fast_orchestrator([("spotify", 2), ("lastfm", 3)]);
    let spotify = Gauge::default();
    let lastfm = Gauge::default();

    let spotify_tasks: Vec<BoxedTask<usize>> = (0..10).map(|i| spotify.task(i, Duration::from_millis(10))).collect();
    let lastfm_tasks: Vec<BoxedTask<usize>> = (0..10).map(|i| lastfm.task(i, Duration::from_millis(7))).collect();
    let single = o.execute(|| async { anyhow::Ok(99_usize) }, "spotify");

    let (a, b, c) = tokio::join!(
        o.execute_batch(spotify_tasks, "spotify"),
        o.execute_batch(lastfm_tasks, "lastfm"),
        single
    );
    assert_eq!(a.unwrap(), (0..10).collect::<Vec<_>>());
    assert_eq!(b.unwrap(), (0..10).collect::<Vec<_>>());
    assert_eq!(c.unwrap(), 99);

    assert!(spotify.peak() <= 2);
    assert!(lastfm.peak() <= 3);
    let stats = o.lane_stats("spotify").unwrap();
    assert_eq!(stats.peak_in_flight, 2);
    assert_eq!(stats.completed, 11);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn test_throwing_task_releases_slot() {
    let o = fast_orchestrator([("anthropic", 1)]);

    let (first, second, third) = tokio::join!(
        o.execute(|| async { anyhow::Ok("summary") }, "anthropic"),
        o.execute(|| async { Err::<&str, _>(anyhow::anyhow!("anthropic 529 overloaded")) }, "anthropic"),
        o.execute(|| async { anyhow::Ok("retry") }, "anthropic"),
    );

    assert_eq!(first.unwrap(), "summary");
    assert!(second.unwrap_err().to_string().contains("529"));
    assert_eq!(third.unwrap(), "retry");

    let stats = o.lane_stats("anthropic").unwrap();
    assert_eq!(stats.peak_in_flight, 1);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(o.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_task_releases_slot() {
    let o = fast_orchestrator([("deezer", 1)]);

    let (boom, after) = tokio::join!(
        o.execute(
            || async {
                let explode = true;
                if explode {
                    panic!("deezer payload");
                }
                anyhow::Ok(0_u8)
            },
            "deezer"
        ),
        o.execute(|| async { anyhow::Ok(1_u8) }, "deezer"),
    );

    let err = boom.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SchedulerError>(),
        Some(SchedulerError::TaskPanicked(msg)) if msg.contains("deezer payload")
    ));
    assert_eq!(after.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_lane_does_not_block_other_lanes() {
    let o = fast_orchestrator([("anthropic", 1), ("spotify", 5)]);
    let started = Instant::now();

    let slow = |label: &'static str| {
        move || async move {
            sleep(Duration::from_secs(10)).await;
            anyhow::Ok(label)
        }
    };
    let (first, second, fast) = tokio::join!(
        o.execute(slow("first"), "anthropic"),
        o.execute(slow("second"), "anthropic"),
        async {
            let value = o.execute(|| async { anyhow::Ok("track") }, "spotify").await;
            (value, started.elapsed())
        },
    );

    let (value, elapsed) = fast;
    assert_eq!(value.unwrap(), "track");
    assert!(elapsed < Duration::from_millis(100), "fast lane waited {elapsed:?}");
    assert_eq!(first.unwrap(), "first");
    assert_eq!(second.unwrap(), "second");
    // the backlogged task ran after the first released its slot
    assert!(started.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_execute_batch_preserves_order() {
    let o = fast_orchestrator([("lastfm", 10)]);
    let tasks: Vec<BoxedTask<u64>> = (0..5_u64)
        .map(|i| {
            task(move || async move {
                sleep(Duration::from_millis(50 - i * 10)).await;
                anyhow::Ok(i * 100)
            })
        })
        .collect();

    assert_eq!(o.execute_batch(tasks, "lastfm").await.unwrap(), vec![0, 100, 200, 300, 400]);
    assert!(o.execute_batch(Vec::<BoxedTask<u64>>::new(), "lastfm").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_execute_batch_fails_on_first_failure() {
    let o = fast_orchestrator([("deezer", 4)]);
    let finished = Arc::new(AtomicUsize::new(0));
    let slow_done = Arc::clone(&finished);
    let tasks: Vec<BoxedTask<u8>> = vec![
        task(|| async { anyhow::Ok(1_u8) }),
        task(|| async {
            sleep(Duration::from_millis(5)).await;
            Err::<u8, _>(anyhow::anyhow!("deezer 500"))
        }),
        task(move || async move {
            sleep(Duration::from_millis(50)).await;
            slow_done.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(3_u8)
        }),
    ];

    let err = o.execute_batch(tasks, "deezer").await.unwrap_err();
    assert!(err.to_string().contains("deezer 500"));

    // the remaining task still runs to completion
    sleep(Duration::from_millis(100)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(o.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reopening_open_batch_fails() {
    let o = fast_orchestrator([]);
    let make = || -> Vec<BoxedTask<u8>> { vec![task(|| async { anyhow::Ok(1_u8) })] };

    o.enqueue_batch("x", make()).unwrap();
    let err = o.enqueue_batch("x", make()).unwrap_err();
    assert!(matches!(err, SchedulerError::BatchAlreadyOpen(id) if id == "x"));

    assert_eq!(o.await_batch::<u8>("x").await.unwrap(), vec![Some(1)]);
    assert!(matches!(
        o.await_batch::<u8>("x").await,
        Err(SchedulerError::BatchNotFound(_))
    ));
    o.enqueue_batch("x", make()).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_await_batch_maps_failures_to_none() {
    let o = fast_orchestrator([("spotify", 2)]);
    let id = o.generate_batch_id();
    let tasks: Vec<BoxedTask<String>> = vec![
        task(|| async { anyhow::Ok("artist".to_string()) }),
        task(|| async { Err::<String, _>(anyhow::anyhow!("spotify 404")) }),
        task(|| async { anyhow::Ok("album".to_string()) }),
    ];

    o.enqueue_batch_in_lane(&id, "spotify", tasks).unwrap();
    let results = o.await_batch::<String>(&id).await.unwrap();
    assert_eq!(results, vec![Some("artist".to_string()), None, Some("album".to_string())]);

    let stats = o.lane_stats("spotify").unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert!(!o.is_batch_open(&id));
}

#[tokio::test(start_paused = true)]
async fn test_await_batch_wrong_type_keeps_batch() {
    let o = fast_orchestrator([]);
    o.enqueue_batch("typed", vec![task(|| async { anyhow::Ok(5_u32) })]).unwrap();

    assert!(matches!(
        o.await_batch::<String>("typed").await,
        Err(SchedulerError::BatchTypeMismatch(_))
    ));
    assert_eq!(o.await_batch::<u32>("typed").await.unwrap(), vec![Some(5)]);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_await_releases_batch_id() {
    let o = fast_orchestrator([]);
    o.enqueue_batch(
        "slow",
        vec![task(|| async {
            sleep(Duration::from_secs(60)).await;
            anyhow::Ok(())
        })],
    )
    .unwrap();

    let waited = tokio::time::timeout(Duration::from_millis(10), o.await_batch::<()>("slow")).await;
    assert!(waited.is_err());
    assert!(!o.is_batch_open("slow"));
    assert_eq!(o.open_batches(), 0);
    assert_eq!(o.pending_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_count_tracks_batches() {
    let o = fast_orchestrator([]);
    let tasks: Vec<BoxedTask<u8>> = (0..3_u8)
        .map(|i| {
            task(move || async move {
                sleep(Duration::from_millis(50)).await;
                anyhow::Ok(i)
            })
        })
        .collect();

    o.enqueue_batch("pending", tasks).unwrap();
    assert_eq!(o.pending_count(), 3);
    assert_eq!(o.await_batch::<u8>("pending").await.unwrap(), vec![Some(0), Some(1), Some(2)]);
    assert_eq!(o.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_lane_routes_to_default() {
    let o = fast_orchestrator([("spotify", 2)]);
    let value = o.execute(|| async { anyhow::Ok("mbid") }, "musicbrainz").await.unwrap();
    assert_eq!(value, "mbid");
    assert_eq!(o.lane_stats(DEFAULT_LANE).unwrap().completed, 1);

    let names: Vec<String> = o.all_lane_stats().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec![DEFAULT_LANE.to_string(), "spotify".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_global_rate_shared_across_lanes() {
    let sink = InMemoryAuditSink::new(128);
    let o = OrchestratorBuilder::new()
        .rate(10.0)
        .burst(2.0)
        .jitter_ms(0)
        .lanes([("spotify", 5), ("lastfm", 5)])
        .audit(Arc::new(sink.clone()))
        .build()
        .unwrap();

    let spotify: Vec<BoxedTask<usize>> = (0..10_usize).map(|i| task(move || async move { anyhow::Ok(i) })).collect();
    let lastfm: Vec<BoxedTask<usize>> = (0..10_usize).map(|i| task(move || async move { anyhow::Ok(i) })).collect();

    let started = Instant::now();
    let (a, b) = tokio::join!(o.execute_batch(spotify, "spotify"), o.execute_batch(lastfm, "lastfm"));
    assert_eq!(a.unwrap().len(), 10);
    assert_eq!(b.unwrap().len(), 10);

    assert_eq!(sink.len(), 20);
    assert!(sink.max_in_window(Duration::from_secs(1)) <= 12);
    // 2 burst tokens, then 18 more at 10/s
    assert!(started.elapsed() >= Duration::from_millis(1700));
    assert_eq!(o.scheduler().stats().dispatched, 20);
}

#[tokio::test]
async fn test_build_orchestrator_from_config() {
    let config = OrchestratorConfig {
        throttle: SchedulerConfig::new().with_rate(5.0),
        lanes: BTreeMap::from([(DEFAULT_LANE.to_string(), 2), ("anthropic".to_string(), 1)]),
    };
    let o = build_orchestrator(&config).unwrap();
    assert_eq!(o.scheduler().concurrency(), 3);
    assert_eq!(o.lane_stats("anthropic").unwrap().max_concurrent, 1);

    let invalid = OrchestratorConfig::default().with_lane("spotify", 0);
    assert!(matches!(
        build_orchestrator(&invalid),
        Err(SchedulerError::InvalidConfig(_))
    ));
}
