//! Integration tests for the ingestion pipeline
//!
//! These tests run the full path over in-process collaborators:
//! - Channel transport delivering encoded messages
//! - Consumer loops with commit-after-handle
//! - Dispatch into the series store, usage accounting and the definition cache
//! - Definition index over the in-memory search backend

use std::sync::Arc;
use std::time::{Duration, Instant};

use metric_ingest::engine::{MemorySeriesStore, MemoryUsage, UsageTracker};
use metric_ingest::index::{DefCache, DefinitionIndex, IndexConfig, MemoryBackend, SearchBackend};
use metric_ingest::input::{
    encode_message, ChannelTransport, Consumer, ConsumerState, Delivery, Notification,
    PayloadFormat,
};
use metric_ingest::metrics::{gather_text, InputMetrics};
use metric_ingest::types::{MetricData, Point};
use prometheus::Registry;

// ============================================================================
// Helper Functions
// ============================================================================

fn metric(org_id: i32, name: &str, time: i64, value: f64) -> MetricData {
    MetricData {
        id: format!("{}.{}", org_id, name),
        org_id,
        name: name.to_string(),
        metric: name.to_string(),
        interval: 10,
        unit: "ms".to_string(),
        time,
        value,
        target_type: "gauge".to_string(),
        tags: vec!["env:prod".to_string()],
    }
}

fn delivery(offset: i64, metrics: &[Option<MetricData>]) -> Delivery {
    Delivery {
        topic: "mdm".to_string(),
        partition: (offset % 2) as i32,
        offset,
        key: Some(format!("key-{}", offset).into_bytes()),
        payload: encode_message(PayloadFormat::MsgPack, 0, metrics).unwrap(),
    }
}

struct Pipeline {
    consumer: Consumer<ChannelTransport>,
    tx: tokio::sync::mpsc::Sender<Delivery>,
    store: Arc<MemorySeriesStore>,
    usage: Arc<MemoryUsage>,
    index: Arc<DefinitionIndex>,
    backend: Arc<MemoryBackend>,
    registry: Registry,
}

async fn pipeline() -> Pipeline {
    let registry = Registry::new();
    let backend = Arc::new(MemoryBackend::with_page_size(3));
    let config = IndexConfig {
        warmup_window: Duration::ZERO,
        ..Default::default()
    };
    let index = Arc::new(
        DefinitionIndex::init(config, backend.clone(), &registry)
            .await
            .unwrap(),
    );
    let defs = Arc::new(DefCache::new(index.clone(), Duration::from_secs(6 * 3600)));

    let (transport, tx) = ChannelTransport::new(16);
    let consumer = Consumer::new(transport);
    let store = Arc::new(MemorySeriesStore::new());
    let usage = Arc::new(MemoryUsage::new());
    consumer
        .start(
            store.clone(),
            defs,
            Some(usage.clone() as Arc<dyn UsageTracker>),
            InputMetrics::new("kafka", &registry).unwrap(),
        )
        .unwrap();

    Pipeline {
        consumer,
        tx,
        store,
        usage,
        index,
        backend,
        registry,
    }
}

async fn wait_for_commits(pipeline: &Pipeline, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.consumer.transport().committed().len() < n && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pipeline.consumer.transport().committed().len(), n);
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_messages_reach_store_usage_and_index() {
    let p = pipeline().await;

    for offset in 0..5 {
        let t = 1_000 + offset * 10;
        p.tx.send(delivery(
            offset,
            &[
                Some(metric(1, "cpu.user", t, offset as f64)),
                None,
                Some(metric(2, "mem.free", t, 2.0)),
            ],
        ))
        .await
        .unwrap();
    }
    wait_for_commits(&p, 5).await;

    p.consumer.stop().unwrap().wait().await;
    assert_eq!(p.consumer.state(), ConsumerState::Stopped);
    p.index.stop().await;

    let points = p.store.points("1.cpu.user").unwrap();
    assert_eq!(points.len(), 5);
    assert_eq!(points[4], Point::new(1_040, 4.0));
    assert_eq!(p.usage.count(2, "2.mem.free"), 5);

    // one definition per series despite five points each
    assert_eq!(p.backend.doc_count("metric"), 2);
    let def = p.index.get_definition("1.cpu.user").await.unwrap().unwrap();
    assert_eq!(def.last_update, 1_000);
    assert_eq!(def.node_count, 2);
    assert_eq!(def.tags, vec!["env:prod"]);

    let text = gather_text(&p.registry).unwrap();
    assert!(text.contains("ingest_metrics_received_total{input=\"kafka\"} 15"));
    assert!(text.contains("ingest_metrics_invalid_total{input=\"kafka\"} 5"));
}

#[tokio::test]
async fn test_nothing_handled_after_stop_signal() {
    let p = pipeline().await;

    p.tx.send(delivery(0, &[Some(metric(1, "a", 100, 1.0))]))
        .await
        .unwrap();
    wait_for_commits(&p, 1).await;

    let signal = p.consumer.stop().unwrap();
    signal.clone().wait().await;
    assert!(signal.is_stopped());

    // deliveries after the stop are never handled
    let _ = p.tx.send(delivery(1, &[Some(metric(1, "b", 100, 1.0))])).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(p.store.points("1.b").is_none());
    assert_eq!(p.consumer.transport().committed().len(), 1);

    p.index.stop().await;
}

#[tokio::test]
async fn test_rebalance_notifications_do_not_block_messages() {
    let p = pipeline().await;

    let mut claimed = std::collections::BTreeMap::new();
    claimed.insert("mdm".to_string(), vec![0, 1]);
    p.consumer.transport().notify(Notification {
        claimed: claimed.clone(),
        released: Default::default(),
        current: claimed,
    });
    p.consumer.transport().notify(Notification::default());

    p.tx.send(delivery(0, &[Some(metric(1, "a", 100, 1.0))]))
        .await
        .unwrap();
    wait_for_commits(&p, 1).await;

    p.consumer.stop().unwrap().wait().await;
    p.index.stop().await;
}

#[tokio::test]
async fn test_undecodable_message_is_committed_and_skipped() {
    let p = pipeline().await;

    p.tx.send(Delivery {
        topic: "mdm".to_string(),
        partition: 0,
        offset: 0,
        key: None,
        payload: vec![0xff, 0x00],
    })
    .await
    .unwrap();
    p.tx.send(delivery(1, &[Some(metric(1, "a", 100, 1.0))]))
        .await
        .unwrap();
    wait_for_commits(&p, 2).await;

    assert_eq!(p.store.len(), 1);
    let text = gather_text(&p.registry).unwrap();
    assert!(text.contains("ingest_message_decode_errors_total{input=\"kafka\"} 1"));

    p.consumer.stop().unwrap().wait().await;
    p.index.stop().await;
}

#[tokio::test]
async fn test_full_scan_after_ingest() {
    let p = pipeline().await;

    let metrics: Vec<Option<MetricData>> = (0..7)
        .map(|i| Some(metric(1, &format!("series.{}", i), 100, 1.0)))
        .collect();
    p.tx.send(delivery(0, &metrics)).await.unwrap();
    wait_for_commits(&p, 1).await;
    p.index.flush().await.unwrap();

    let mut cursor = String::new();
    let mut ids = Vec::new();
    let mut pages = 0;
    loop {
        let (defs, next) = p.index.list_definitions(&cursor).await.unwrap();
        pages += 1;
        ids.extend(defs.into_iter().map(|d| d.id));
        if next.is_empty() {
            break;
        }
        cursor = next;
    }
    ids.sort();
    assert_eq!(ids.len(), 7);
    assert_eq!(ids[0], "1.series.0");
    // pages of 3, 3, 1 and a final empty page
    assert_eq!(pages, 4);

    p.consumer.stop().unwrap().wait().await;
    p.index.stop().await;
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let p = pipeline().await;
    let message = delivery(0, &[Some(metric(1, "cpu.user", 1_000, 7.5))]);

    p.tx.send(message.clone()).await.unwrap();
    wait_for_commits(&p, 1).await;
    p.index.flush().await.unwrap();
    let points = p.store.points("1.cpu.user").unwrap();
    let doc = p.backend.get("metric", "1.cpu.user").await.unwrap().unwrap();
    let bulk_calls = p.backend.bulk_calls();

    // same offset, same payload
    p.tx.send(message).await.unwrap();
    wait_for_commits(&p, 2).await;
    p.index.flush().await.unwrap();

    assert_eq!(p.store.points("1.cpu.user").unwrap(), points);
    assert_eq!(p.store.series("1.cpu.user").unwrap().adds(), 2);
    assert_eq!(p.usage.count(1, "1.cpu.user"), 2);
    assert_eq!(
        p.backend.get("metric", "1.cpu.user").await.unwrap().unwrap(),
        doc
    );
    assert_eq!(p.backend.doc_count("metric"), 1);
    assert_eq!(p.backend.bulk_calls(), bulk_calls);

    let committed = p.consumer.transport().committed();
    assert_eq!(committed[0], committed[1]);

    p.consumer.stop().unwrap().wait().await;
    p.index.stop().await;
}

#[tokio::test]
async fn test_extreme_time_does_not_stall_ingestion() {
    let p = pipeline().await;

    p.tx.send(delivery(0, &[Some(metric(1, "a", 1_000, 1.0))]))
        .await
        .unwrap();
    p.tx.send(delivery(1, &[Some(metric(1, "a", i64::MIN, 1.0))]))
        .await
        .unwrap();
    p.tx.send(delivery(2, &[Some(metric(1, "b", 1_000, 1.0))]))
        .await
        .unwrap();
    wait_for_commits(&p, 3).await;

    assert_eq!(p.store.points("1.a").unwrap(), vec![Point::new(1_000, 1.0)]);
    assert_eq!(p.store.points("1.b").unwrap(), vec![Point::new(1_000, 1.0)]);
    assert_eq!(p.consumer.state(), ConsumerState::Running);
    let text = gather_text(&p.registry).unwrap();
    assert!(text.contains("ingest_metrics_invalid_total{input=\"kafka\"} 1"));

    p.consumer.stop().unwrap().wait().await;
    p.index.stop().await;
}
