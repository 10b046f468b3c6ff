//! Integration tests for the Redis lease store against a real server.
//!
//! # Running these tests
//!
//! ```bash
//! cargo test --package kvd-core --test redis_integration_tests -- --ignored
//! ```
//!
//! A Docker daemon is required; the Redis container is started with testcontainers.

use std::time::Duration;

use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage,
};

use kvd_core::leadership::{LeaseStore, RedisLeaseStore, RedisStoreConfig};

/// A running Redis container and a store connected to it.
struct RedisFixture {
    _container: ContainerAsync<GenericImage>,
    store: RedisLeaseStore,
}

async fn start_redis() -> RedisFixture {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));

    let container = AsyncRunner::start(image)
        .await
        .expect("Failed to start Redis container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get port");

    let config = RedisStoreConfig::new(host.to_string(), port)
        .with_connect_timeout(Duration::from_secs(2))
        .with_operation_timeout(Duration::from_secs(2));
    let store = RedisLeaseStore::new(config).expect("Failed to create store");
    store.ping().await.expect("Redis did not answer PING");

    RedisFixture {
        _container: container,
        store,
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_acquire_is_create_if_absent() {
    let redis = start_redis().await;
    let ttl = Duration::from_millis(15_000);

    assert!(redis.store.acquire("lk", "A", ttl).await);
    assert!(!redis.store.acquire("lk", "B", ttl).await);
    assert!(!redis.store.acquire("lk", "A", ttl).await);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_renew_compares_token() {
    let redis = start_redis().await;
    let ttl = Duration::from_millis(15_000);

    assert!(!redis.store.renew("lk", "A", ttl).await);
    assert!(redis.store.acquire("lk", "A", ttl).await);
    assert!(redis.store.renew("lk", "A", ttl).await);
    assert!(!redis.store.renew("lk", "B", ttl).await);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_lease_expires_and_can_be_taken_over() {
    let redis = start_redis().await;
    let short = Duration::from_millis(300);

    assert!(redis.store.acquire("lk", "A", short).await);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(!redis.store.renew("lk", "A", short).await);
    assert!(redis.store.acquire("lk", "B", Duration::from_secs(15)).await);
    assert!(!redis.store.renew("lk", "A", short).await);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_renew_keeps_lease_alive_past_first_ttl() {
    let redis = start_redis().await;
    let ttl = Duration::from_millis(500);

    assert!(redis.store.acquire("lk", "A", ttl).await);
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(redis.store.renew("lk", "A", ttl).await);
    }

    assert!(!redis.store.acquire("lk", "B", ttl).await);
}
