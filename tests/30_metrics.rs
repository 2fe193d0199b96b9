mod common;

use common::{connected, reporter, test_config, FakeConnector};
use pgwatch_api::config::DatabaseConfig;
use pgwatch_api::database::{ConnectionManager, PoolStats};
use std::time::Duration;
use tokio::time::sleep;

fn stats(open: u32, idle: u32, wait_count: u64) -> PoolStats {
    PoolStats {
        open,
        idle,
        in_use: open - idle,
        wait_count,
        wait_duration: Duration::from_millis(wait_count * 10),
    }
}

#[tokio::test(start_paused = true)]
async fn metrics_are_collected_at_connect_with_configured_bounds() {
    let connector = FakeConnector::healthy();
    connector.pool.set_stats(stats(3, 1, 0));
    let (_memory, reporter) = reporter();
    let config = DatabaseConfig {
        max_open_connections: 40,
        max_idle_connections: 9,
        ..test_config()
    };

    let manager = ConnectionManager::connect(&connector, config, reporter).await.unwrap();
    let metrics = manager.metrics().await;

    assert_eq!(metrics.total_connections, 3);
    assert_eq!(metrics.open_connections, 3);
    assert_eq!(metrics.idle_connections, 1);
    assert_eq!(metrics.in_use_connections, 2);
    assert_eq!(metrics.max_open_connections, 40);
    assert_eq!(metrics.max_idle_connections, 9);
}

#[tokio::test(start_paused = true)]
async fn metrics_refresh_on_the_collection_interval() {
    let (manager, pool, _memory) = connected(test_config()).await;
    pool.set_stats(stats(8, 2, 4));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.metrics().await.open_connections, 0, "not yet polled");

    sleep(Duration::from_secs(6)).await;
    let metrics = manager.metrics().await;
    assert_eq!(metrics.open_connections, 8);
    assert_eq!(metrics.in_use_connections, 6);
    assert_eq!(metrics.wait_count, 4);
    assert_eq!(metrics.wait_duration, Duration::from_millis(40));
    assert_eq!(metrics.max_open_connections, 25);
    assert_eq!(metrics.max_idle_connections, 5);
}

#[tokio::test(start_paused = true)]
async fn failed_collection_leaves_snapshot_stale() {
    let (manager, pool, _memory) = connected(test_config()).await;
    pool.set_stats(stats(4, 4, 0));
    manager.refresh_metrics().await.unwrap();

    pool.set_stats_fail(true);
    pool.set_stats(stats(9, 0, 1));
    sleep(Duration::from_secs(25)).await;

    let metrics = manager.metrics().await;
    assert_eq!(metrics.open_connections, 4);
    assert!(manager.refresh_metrics().await.is_err());
    // Collection failures do not touch liveness
    assert!(manager.is_healthy().await);
}

#[tokio::test(start_paused = true)]
async fn refresh_metrics_polls_immediately() {
    let (manager, pool, _memory) = connected(test_config()).await;
    pool.set_stats(stats(2, 0, 7));

    let refreshed = manager.refresh_metrics().await.unwrap();

    assert_eq!(refreshed.in_use_connections, 2);
    assert_eq!(manager.metrics().await, refreshed);
}
