mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use fleetwire_core::{Error, LifecycleComponent, LifecycleStatus};
use fleetwire_provisioning::config::InboundConfig;
use fleetwire_provisioning::{
    BlockingQueueInboundProcessingStrategy, InboundEventProcessor, InboundEventProcessorChain,
    InboundProcessingStrategy,
};
use tokio::sync::Semaphore;

fn config(capacity: usize, workers: usize) -> InboundConfig {
    InboundConfig {
        queue_capacity: capacity,
        worker_count: workers,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_requests_queued_before_start_are_processed() {
    let processor = Arc::new(RecordingInboundProcessor::new("recorder", Behavior::Record));
    let strategy = BlockingQueueInboundProcessingStrategy::new(config(3, 2), processor.clone(), ctx());

    strategy.try_submit(measurements("dev-1", "temp", 20.0)).unwrap();
    strategy.try_submit(alert("dev-2")).unwrap();
    strategy.try_submit(location("dev-3")).unwrap();

    let err = strategy.try_submit(measurements("dev-4", "temp", 21.0)).unwrap_err();
    assert!(matches!(err, Error::QueueFull(3)));
    assert_eq!(strategy.metrics().backlog, 3);
    assert_eq!(processor.call_count(), 0);

    strategy.start().await.unwrap();
    eventually(|| processor.call_count() == 3).await;

    let mut kinds: Vec<String> = processor.calls().into_iter().map(|(kind, _)| kind).collect();
    kinds.sort();
    assert_eq!(kinds, vec!["alert", "location", "measurements"]);

    let metrics = strategy.metrics();
    assert_eq!(metrics.submitted, 3);
    assert_eq!(metrics.processed, 3);
    assert_eq!(metrics.errors, 0);
    assert_eq!(metrics.backlog, 0);

    strategy.stop().await.unwrap();
}

#[tokio::test]
async fn test_submit_blocks_while_queue_is_full() {
    let gate = Arc::new(Semaphore::new(0));
    let processor = Arc::new(RecordingInboundProcessor::gated("gated", gate.clone()));
    let strategy = Arc::new(BlockingQueueInboundProcessingStrategy::new(
        config(1, 1),
        processor.clone(),
        ctx(),
    ));
    strategy.start().await.unwrap();

    // First request occupies the only worker, second fills the queue.
    strategy.submit(measurements("dev-1", "temp", 1.0)).await.unwrap();
    eventually(|| processor.entered() == 1).await;
    strategy.submit(measurements("dev-2", "temp", 2.0)).await.unwrap();

    let blocked = tokio::time::timeout(
        Duration::from_millis(100),
        strategy.submit(measurements("dev-3", "temp", 3.0)),
    )
    .await;
    assert!(blocked.is_err(), "submit should wait for queue space");

    gate.add_permits(10);
    tokio::time::timeout(
        Duration::from_secs(2),
        strategy.submit(measurements("dev-3", "temp", 3.0)),
    )
    .await
    .expect("submit should resume once space frees up")
    .unwrap();

    eventually(|| processor.call_count() == 3).await;
    strategy.stop().await.unwrap();
}

#[tokio::test]
async fn test_failures_are_counted_and_processing_continues() {
    for behavior in [Behavior::Fail, Behavior::Panic] {
        let processor = Arc::new(RecordingInboundProcessor::new("faulty", behavior));
        let strategy = BlockingQueueInboundProcessingStrategy::new(config(10, 1), processor, ctx());
        strategy.start().await.unwrap();

        for i in 0..3 {
            strategy.submit(alert(&format!("dev-{}", i))).await.unwrap();
        }
        eventually(|| strategy.metrics().processed == 3).await;

        let metrics = strategy.metrics();
        assert_eq!(metrics.errors, 3, "{:?} should count every failure", behavior);
        assert_eq!(strategy.lifecycle_status(), LifecycleStatus::Started);
        strategy.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_submit_after_stop_is_interrupted() {
    let processor = Arc::new(RecordingInboundProcessor::new("recorder", Behavior::Record));
    let strategy = BlockingQueueInboundProcessingStrategy::new(config(10, 1), processor, ctx());
    strategy.start().await.unwrap();
    strategy.stop().await.unwrap();

    let err = strategy.submit(alert("dev-1")).await.unwrap_err();
    assert!(matches!(err, Error::Interrupted(_)));
    let err = strategy.try_submit(alert("dev-1")).unwrap_err();
    assert!(matches!(err, Error::Interrupted(_)));

    let err = strategy.start().await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_failures_inside_chain_are_counted() {
    let failing = Arc::new(RecordingInboundProcessor::new("failing", Behavior::Fail));
    let panicking = Arc::new(RecordingInboundProcessor::new("panicking", Behavior::Panic));
    let recorder = Arc::new(RecordingInboundProcessor::new("recorder", Behavior::Record));
    let chain = Arc::new(
        InboundEventProcessorChain::new()
            .with_processor(failing.clone())
            .with_processor(panicking.clone())
            .with_processor(recorder.clone()),
    );
    chain.start().await.unwrap();

    let strategy = BlockingQueueInboundProcessingStrategy::new(config(10, 2), chain.clone(), ctx());
    strategy.start().await.unwrap();
    for i in 0..3 {
        strategy.submit(alert(&format!("dev-{}", i))).await.unwrap();
    }
    eventually(|| strategy.metrics().processed == 3).await;

    assert_eq!(failing.entered(), 3);
    assert_eq!(panicking.entered(), 3);
    assert_eq!(recorder.call_count(), 3);
    assert_eq!(chain.isolated_failures(), 6);
    assert_eq!(strategy.metrics().errors, 6);
    strategy.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_monitor_reports_until_stopped() {
    let processor = Arc::new(RecordingInboundProcessor::new("recorder", Behavior::Record));
    let strategy = BlockingQueueInboundProcessingStrategy::new(
        InboundConfig {
            queue_capacity: 10,
            worker_count: 1,
            enable_monitoring: true,
            monitoring_interval_secs: 1,
        },
        processor,
        ctx(),
    );
    strategy.start().await.unwrap();
    strategy.submit(alert("dev-1")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let reports = strategy.monitor_reports();
    assert!(reports >= 2, "monitor logged {} reports", reports);

    strategy.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(strategy.monitor_reports(), reports);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_disabled_by_default() {
    let processor = Arc::new(RecordingInboundProcessor::new("recorder", Behavior::Record));
    let strategy = BlockingQueueInboundProcessingStrategy::new(config(10, 1), processor, ctx());
    strategy.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(strategy.monitor_reports(), 0);
    strategy.stop().await.unwrap();
}
