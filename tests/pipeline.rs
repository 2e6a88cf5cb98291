//! Integration tests for dataflow stages

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskweld::prelude::*;
use tokio_test::assert_ok;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct FlaggedSink {
    _flag: DropFlag,
}

#[async_trait]
impl Sink for FlaggedSink {
    type Item = i32;

    async fn write(&mut self, _item: i32) -> Result<()> {
        Ok(())
    }
}

fn propagate() -> LinkOptions {
    LinkOptions::default().propagate_completion(true)
}

#[tokio::test]
async fn test_three_stage_pipeline() -> Result<()> {
    let multiply = TransformStage::map(|item: i32| item * 2);
    let subtract = TransformStage::map(|item: i32| item - 2);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(0));
    let output = ActionStage::from_fn({
        let calls = calls.clone();
        let seen = seen.clone();
        move |item: i32| {
            calls.fetch_add(1, Ordering::SeqCst);
            seen.store(item as usize, Ordering::SeqCst);
        }
    });

    multiply.link_to(&subtract, propagate());
    subtract.link_to(&output, propagate());

    multiply.post(9)?;
    multiply.complete();
    output.completion().await?;

    assert_eq!(seen.load(Ordering::SeqCst), 16);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(multiply.is_completed());
    assert!(subtract.is_completed());
    Ok(())
}

#[tokio::test]
async fn test_report_sink_stage() -> Result<()> {
    let reporter = MemoryReporter::new();
    let multiply = TransformStage::map(|item: i32| item * 2);
    let output = ActionStage::new(ReportSink::new(reporter.clone()), StageConfig::new("print"));
    multiply.link_to(&output, propagate());

    multiply.post(9)?;
    multiply.post(10)?;
    multiply.complete();
    output.completion().await?;

    assert_eq!(reporter.lines(), vec!["18", "20"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stage_preserves_fifo_order() -> Result<()> {
    let square = TransformStage::map(|item: u64| item * item);
    let collector = CollectSink::new();
    let output = ActionStage::new(collector.clone(), StageConfig::new("collect"));
    square.link_to(&output, propagate());

    for item in 0..500u64 {
        square.post(item)?;
    }
    square.complete();
    output.completion().await?;

    let expected: Vec<u64> = (0..500u64).map(|x| x * x).collect();
    assert_eq!(collector.snapshot().await, expected);
    Ok(())
}

#[tokio::test]
async fn test_outputs_wait_for_a_link() -> Result<()> {
    let negate = TransformStage::map(|item: i32| -item);
    negate.post(1)?;
    negate.post(2)?;
    negate.complete();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!negate.is_completed());

    let collector = CollectSink::new();
    let output = ActionStage::new(collector.clone(), StageConfig::default());
    negate.link_to(&output, propagate());

    output.completion().await?;
    assert_eq!(collector.snapshot().await, vec![-1, -2]);
    Ok(())
}

#[tokio::test]
async fn test_completion_without_propagation() -> Result<()> {
    let increment = TransformStage::map(|item: i32| item + 1);
    let collector = CollectSink::new();
    let output = ActionStage::new(collector.clone(), StageConfig::default());
    increment.link_to(&output, LinkOptions::default());

    increment.post(1)?;
    increment.complete();
    increment.completion().await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!output.is_completed());

    output.complete();
    output.completion().await?;
    assert_eq!(collector.snapshot().await, vec![2]);
    Ok(())
}

#[tokio::test]
async fn test_bounded_stage_rejects_when_full() -> Result<()> {
    let collector = CollectSink::new();
    let output = ActionStage::new(
        collector.clone(),
        StageConfig::new("narrow").bounded_capacity(1),
    );

    // the worker has not been scheduled yet, so the queue stays full
    output.post(1)?;
    let rejected = output.post(2).unwrap_err();
    assert!(matches!(rejected, Error::QueueFull { capacity: 1, .. }));

    output.send(2).await?;
    output.complete();
    output.completion().await?;
    assert_eq!(collector.snapshot().await, vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn test_completed_stage_declines_posts() -> Result<()> {
    let output = ActionStage::from_fn(|_: i32| {});
    output.complete();
    assert!(matches!(output.post(1), Err(Error::Declined { .. })));
    assert_ok!(output.completion().await);
    Ok(())
}

#[tokio::test]
async fn test_fault_propagates_to_linked_stages() {
    init_tracing();
    let parse = TransformStage::try_map(|item: i32| {
        if item == 3 {
            Err(Error::custom("cannot handle 3"))
        } else {
            Ok(item)
        }
    });
    let collector = CollectSink::new();
    let output = ActionStage::new(collector.clone(), StageConfig::default());
    parse.link_to(&output, propagate());

    for item in 1..=5 {
        parse.post(item).unwrap();
    }

    let fault = output.completion().await.unwrap_err();
    assert_eq!(fault.to_string(), "cannot handle 3");
    assert!(parse.completion().await.is_err());
    assert!(matches!(parse.post(6), Err(Error::Declined { .. })));
    // the faulted sink drops whatever was still queued
    assert!(collector.snapshot().await.iter().all(|item| *item < 3));
}

#[tokio::test]
async fn test_external_fault_drops_queued_items() {
    init_tracing();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let output = ActionStage::from_fn(move |_: i32| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    output.post(1).unwrap();
    output.post(2).unwrap();
    output.fault(Error::custom("shutting down"));

    let fault = output.completion().await.unwrap_err();
    assert_eq!(fault.to_string(), "shutting down");
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_panicking_stage_faults_downstream() {
    init_tracing();
    let parse = TransformStage::map(|item: i32| {
        if item == 3 {
            panic!("cannot handle {}", item);
        }
        item
    });
    let collector = CollectSink::new();
    let output = ActionStage::new(collector.clone(), StageConfig::new("collect"));
    parse.link_to(&output, propagate());

    for item in 1..=5 {
        parse.post(item).unwrap();
    }

    let fault = tokio::time::timeout(Duration::from_secs(2), output.completion())
        .await
        .expect("downstream stage never finished")
        .unwrap_err();
    assert!(matches!(fault, Error::TaskFailed(_)));
    assert!(fault.to_string().contains("cannot handle 3"));
    assert!(matches!(parse.completion().await, Err(Error::TaskFailed(_))));
    assert!(collector.items().lock().await.iter().all(|item| *item < 3));
}

#[tokio::test]
async fn test_dropped_stage_releases_its_sink() {
    let dropped = Arc::new(AtomicBool::new(false));
    let output = ActionStage::new(
        FlaggedSink {
            _flag: DropFlag(dropped.clone()),
        },
        StageConfig::new("flagged"),
    );
    output.post(1).unwrap();
    drop(output);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(dropped.load(Ordering::SeqCst));
}
