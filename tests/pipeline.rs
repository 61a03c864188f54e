//! Pipelines assembled from configuration.

mod support;

use std::time::Duration;

use dao_chain::forward::ForwardOperation;
use dao_chain::query::{eq, Order};
use dao_chain::{InMemoryStore, Key, PipelineConfig, SelectOptions, Store, StoreBuilder, StoreExt};
use support::{init_tracing, seeded, task, Remote, Task};

const CONFIG: &str = r#"{
    "forward": { "retry_interval_ms": 20 },
    "sliding_window": { "window_size": 5, "query_ttl_ms": 60000 },
    "lru": { "max_size": 10 }
}"#;

#[tokio::test]
async fn configured_pipeline_reads_and_writes_through() {
    init_tracing();
    let config = PipelineConfig::from_json_str(CONFIG).unwrap();
    let builder = StoreBuilder::new(seeded(20)).apply(&config);
    assert_eq!(builder.layers(), ["sliding_window", "lru"]);
    let store = builder.build();

    let options = SelectOptions::new()
        .with_query(eq("project", "alpha"))
        .with_order(Order::asc("id"))
        .with_limit(3);
    let ids: Vec<i64> = store
        .select_vec(&options)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![2, 4, 6]);

    store.remove(&Key::from(4)).await.unwrap();
    let ids: Vec<i64> = store
        .select_vec(&options)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![2, 6, 8]);
}

#[tokio::test]
async fn forwarding_pipeline_catches_up_after_outage() {
    init_tracing();
    let config = PipelineConfig::from_json_str(CONFIG).unwrap();
    let forward = config.forward.unwrap_or_default();
    let remote = Remote::new();
    remote.set_offline(true);

    let store = StoreBuilder::new(remote.clone())
        .store_and_forward(InMemoryStore::<ForwardOperation<Task>>::new(), &forward)
        .await
        .unwrap()
        .build();
    store.put(task(1)).await.unwrap();
    store.put(task(2)).await.unwrap();
    assert!(remote.records.is_empty());

    remote.set_offline(false);
    for _ in 0..100 {
        if remote.records.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(remote.records.find(&Key::from(2)).await.unwrap(), task(2));
    assert_eq!(store.find(&Key::from(1)).await.unwrap(), task(1));
}
