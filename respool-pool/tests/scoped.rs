use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use respool_pool::{task_scope, BoxError, PoolConfig, PoolError, PoolObject, PoolRegistry};

#[derive(Debug)]
struct Conn {
    id: usize,
}

impl PoolObject for Conn {}

fn registry_with(key: &str, max: usize) -> PoolRegistry {
    let registry = PoolRegistry::new();
    registry
        .set_default_config(
            PoolConfig::default()
                .with_min_objects(0)
                .with_max_objects(max)
                .with_get_timeout(Duration::from_secs(1))
                .with_idle_check_interval(Duration::ZERO),
        )
        .unwrap();

    let next = Arc::new(AtomicUsize::new(0));
    assert!(registry.register_anonymous(key, move || {
        let id = next.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, BoxError>(Conn { id }) }
    }));
    registry
}

async fn current_id(registry: &PoolRegistry) -> usize {
    let borrow = registry.borrow_for_task::<Conn>("db", None).await.unwrap();
    let guard = borrow.lock().await.unwrap();
    guard.id
}

#[tokio::test]
async fn helpers_in_one_scope_share_a_borrow() {
    let registry = registry_with("db", 4);

    let (first, second, in_use) = task_scope(async {
        let first = current_id(&registry).await;
        let second = current_id(&registry).await;
        let stats = registry.stats();
        (first, second, stats[0].1.in_use)
    })
    .await;

    assert_eq!(first, second);
    assert_eq!(in_use, 1);
    let (_, stats) = &registry.stats()[0];
    assert_eq!(stats.created, 1);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn concurrent_scopes_borrow_distinct_objects() {
    let registry = registry_with("db", 4);

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(task_scope(async move {
            let id = current_id(&registry).await;
            // Hold the borrow while the other scopes take theirs.
            tokio::time::sleep(Duration::from_millis(20)).await;
            id
        })));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap());
    }
    assert_eq!(ids.len(), 3);

    let (_, stats) = &registry.stats()[0];
    assert_eq!(stats.created, 3);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn failed_scope_still_releases() {
    let registry = registry_with("db", 2);

    let result: Result<(), &str> = task_scope(async {
        current_id(&registry).await;
        Err("request failed")
    })
    .await;

    assert_eq!(result, Err("request failed"));
    let (_, stats) = &registry.stats()[0];
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn invoke_under_contention_stays_within_bounds() {
    let registry = registry_with("db", 2);

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            registry
                .invoke::<Conn, usize, PoolError, _>("db", None, |conn| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok(conn.id)
                    })
                })
                .await
        }));
    }

    for task in tasks {
        let id = task.await.unwrap().unwrap();
        assert!(id < 2, "object {id} exceeds the pool bound");
    }
    let (_, stats) = &registry.stats()[0];
    assert_eq!(stats.created, 2);
    assert_eq!(stats.in_use, 0);
}
