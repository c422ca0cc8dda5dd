//! End-to-end tests through the assembled client
//!
//! A scripted local gateway stands in for Discord; events injected there
//! must flow through the shard manager and event pump into the dispatcher.

use accord_client::{Client, ClientConfig, CollectorConfig, SubscribeOptions};
use accord_events::filters;
use accord_events::middleware::{Middleware, ValidatorMiddleware, Verdict};
use integration_tests::{fixtures, MockGateway};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll until `condition` holds, panicking after ~5 seconds
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Start a one-shard client against the mock gateway and wait for READY
async fn connected_client(gateway: &MockGateway) -> Client {
    let mut config = ClientConfig::new("integration-test-token").unwrap();
    config.gateway_url = Some(gateway.url().to_string());
    config.shard_count = Some(1);
    config.auto_shard = false;
    config.identify_delay = Duration::from_millis(10);

    let client = Client::new(config).unwrap();

    let ready = Arc::new(AtomicUsize::new(0));
    let flag = ready.clone();
    let handler_id = client.on(
        "READY",
        Arc::new(move |_| {
            flag.fetch_add(1, Ordering::SeqCst);
        }),
    );

    client.start().await.unwrap();
    wait_until("READY", || ready.load(Ordering::SeqCst) > 0).await;
    client.off("READY", &handler_id);
    client
}

#[tokio::test]
async fn test_dispatch_flows_to_handlers_with_shard_annotation() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;

    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = seen.clone();
    client.on(
        "MESSAGE_CREATE",
        Arc::new(move |data| sink.lock().push(data.clone())),
    );

    gateway.dispatch(
        "MESSAGE_CREATE",
        fixtures::message_create("42", "777", "hello"),
    );
    wait_until("message delivery", || !seen.lock().is_empty()).await;

    let events = seen.lock().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["content"], "hello");
    // The pump annotates payloads with their shard of origin
    assert_eq!(events[0]["shard_id"], 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_collector_gathers_filtered_matches() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;

    let collector = client.dispatcher().collector(
        "MESSAGE_CREATE",
        Some(filters::by_user_id("42")),
        CollectorConfig {
            timeout: Duration::from_secs(30),
            max_matches: 3,
            dispose_on_timeout: true,
        },
    );

    for i in 0..3 {
        gateway.dispatch(
            "MESSAGE_CREATE",
            fixtures::message_create("42", "777", &format!("wanted {i}")),
        );
        gateway.dispatch(
            "MESSAGE_CREATE",
            fixtures::message_create("99", "777", "noise"),
        );
    }

    let items = collector.wait_for_all().await;
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|m| m["author"]["id"] == "42"));

    // The hidden subscription is gone afterwards
    assert_eq!(client.dispatcher().handler_count("MESSAGE_CREATE"), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_one_shot_handler_fires_once_through_the_stack() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;

    let once_fired = Arc::new(AtomicUsize::new(0));
    let counter = once_fired.clone();
    client.on_with(
        "GUILD_CREATE",
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        SubscribeOptions {
            once: true,
            ..Default::default()
        },
    );

    // A durable handler tells us when all three emissions have landed
    let total = Arc::new(AtomicUsize::new(0));
    let total_counter = total.clone();
    client.on(
        "GUILD_CREATE",
        Arc::new(move |_| {
            total_counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    for _ in 0..3 {
        gateway.dispatch("GUILD_CREATE", fixtures::guild_create("9", "guild"));
    }
    wait_until("all guild creates", || total.load(Ordering::SeqCst) == 3).await;

    assert_eq!(once_fired.load(Ordering::SeqCst), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_validator_blocks_malformed_events() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;

    // Counts emissions seen upstream of the validator (priority 60 > 50)
    struct SeenBeforeValidator(Arc<AtomicUsize>);
    impl Middleware for SeenBeforeValidator {
        fn name(&self) -> &str {
            "seen-before-validator"
        }
        fn priority(&self) -> i32 {
            60
        }
        fn process(&self, _event: &str, _data: &Value) -> Verdict {
            self.0.fetch_add(1, Ordering::SeqCst);
            Verdict::Continue
        }
    }

    let seen_before = Arc::new(AtomicUsize::new(0));
    client
        .dispatcher()
        .add_middleware(Arc::new(SeenBeforeValidator(seen_before.clone())));
    client.dispatcher().add_middleware(Arc::new(
        ValidatorMiddleware::new()
            .with_validator("MESSAGE_CREATE", Arc::new(|v| v.get("id").is_some())),
    ));

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    client.on(
        "MESSAGE_CREATE",
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    // Malformed first, then valid: only the valid one reaches handlers
    gateway.dispatch("MESSAGE_CREATE", fixtures::malformed_message_create());
    gateway.dispatch(
        "MESSAGE_CREATE",
        fixtures::message_create("42", "1", "valid"),
    );

    wait_until("valid delivery", || delivered.load(Ordering::SeqCst) >= 1).await;
    wait_until("upstream middleware", || {
        seen_before.load(Ordering::SeqCst) >= 2
    })
    .await;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_bot_messages_filtered_out() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;

    let human = client.dispatcher().collector(
        "MESSAGE_CREATE",
        Some(filters::not(filters::by_bot(true))),
        CollectorConfig {
            timeout: Duration::from_secs(10),
            max_matches: 1,
            dispose_on_timeout: true,
        },
    );

    gateway.dispatch(
        "MESSAGE_CREATE",
        fixtures::bot_message_create("7", "1", "from a bot"),
    );
    gateway.dispatch(
        "MESSAGE_CREATE",
        fixtures::message_create("42", "1", "from a human"),
    );

    let items = human.wait_for_all().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["content"], "from a human");

    client.shutdown().await;
}

#[tokio::test]
async fn test_cache_export_import_between_clients() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;

    client
        .cache()
        .set("user:42", serde_json::json!({"name": "tester"}))
        .unwrap();
    client
        .cache()
        .set_persistent("config:prefix", serde_json::json!("!"))
        .unwrap();
    client
        .cache()
        .set_with_ttl("ephemeral", serde_json::json!(1), Duration::ZERO)
        .unwrap();

    let exported = client.cache().export();
    client.shutdown().await;

    let target = accord_cache::MemoryCache::new();
    let imported = target.import(&exported, true);

    assert_eq!(imported, 2);
    assert_eq!(
        target.get("user:42"),
        Some(serde_json::json!({"name": "tester"}))
    );
    assert_eq!(target.get("config:prefix"), Some(serde_json::json!("!")));
    assert_eq!(target.get("ephemeral"), None);
}

#[tokio::test]
async fn test_presence_update_broadcasts() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;

    let sent = client
        .update_presence(serde_json::json!({"status": "online", "activities": []}))
        .await;
    assert_eq!(sent, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_single_gateway_session_per_shard() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;

    // A healthy client holds exactly one session for its one shard
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gateway.sessions_started(), 1);

    client.shutdown().await;
}
