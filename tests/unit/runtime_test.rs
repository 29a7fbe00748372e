//! Tests for tokio spawner utilities

use outbound_throttle::core::{SchedulerError, Spawn};
use outbound_throttle::runtime::tokio_spawner::TokioSpawner;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test]
async fn test_current_inside_runtime() {
    let spawner = TokioSpawner::current().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        let _ = tx.send("spawned");
    });
    assert_eq!(rx.await.unwrap(), "spawned");
}

#[test]
fn test_current_outside_runtime() {
    assert!(matches!(TokioSpawner::current(), Err(SchedulerError::Runtime(_))));
}
