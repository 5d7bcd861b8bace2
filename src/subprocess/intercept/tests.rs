//! Pipeline tests against a scripted process

use super::*;
use crate::subprocess::mock::MockProcess;
use crate::subprocess::runner::ExitStatus;
use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn fast_config() -> InterceptConfig {
    InterceptConfig::default().with_drain_timeout(Duration::from_millis(300))
}

async fn wait_for_lines(sink: &MemorySink, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.len() < count && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_lines_delivered_in_order_before_stop_returns() {
    let process = MockProcess::new("geth");
    let output = process.output();
    let mut pipeline = Pipeline::new(process, InterceptConfig::default());

    let captured = Arc::new(MemorySink::new());
    pipeline.register_stdout(captured.clone());

    pipeline.start().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);

    for line in ["a", "b", "c"] {
        output.write_line(StreamSource::Stdout, line).await.unwrap();
    }
    output.exit(ExitStatus::Success).await;

    let started = Instant::now();
    let report = pipeline.stop().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(captured.lines(), vec!["a", "b", "c"]);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(report.stdout.produced, Some(3));
    assert_eq!(report.stdout.delivered, 3);
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn test_every_sink_sees_each_line_in_registration_order() {
    let process = MockProcess::new("geth");
    let output = process.output();
    let mut pipeline = Pipeline::new(process, fast_config());

    let calls = Arc::new(Mutex::new(Vec::new()));
    for name in ["sink-1", "sink-2"] {
        let calls = calls.clone();
        pipeline.register_stdout(Arc::new(move |line: &str| -> Result<()> {
            calls.lock().unwrap().push(format!("{name}:{line}"));
            Ok(())
        }));
    }

    pipeline.start().await.unwrap();
    output
        .write_line(StreamSource::Stdout, "hello")
        .await
        .unwrap();
    pipeline.stop().await.unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec!["sink-1:hello".to_string(), "sink-2:hello".to_string()]
    );
}

#[tokio::test]
async fn test_streams_are_relayed_independently() {
    let process = MockProcess::new("geth");
    let output = process.output();
    let mut pipeline = Pipeline::new(process, fast_config());

    let stdout = Arc::new(MemorySink::new());
    let stderr = Arc::new(MemorySink::new());
    pipeline.register_stdout(stdout.clone());
    pipeline.register_stderr(stderr.clone());

    pipeline.start().await.unwrap();
    for i in 0..50 {
        output
            .write_line(StreamSource::Stdout, &format!("out {i}"))
            .await
            .unwrap();
        output
            .write_line(StreamSource::Stderr, &format!("  err {i}  "))
            .await
            .unwrap();
    }
    let report = pipeline.stop().await.unwrap();

    let expected_out: Vec<String> = (0..50).map(|i| format!("out {i}")).collect();
    let expected_err: Vec<String> = (0..50).map(|i| format!("err {i}")).collect();
    assert_eq!(stdout.lines(), expected_out);
    assert_eq!(stderr.lines(), expected_err);
    assert_eq!(report.stderr.delivered, 50);
}

#[tokio::test]
async fn test_stop_is_bounded_when_process_hangs() {
    let process = MockProcess::new("geth").hanging();
    let output = process.output();
    let mut pipeline = Pipeline::new(process, fast_config());

    let captured = Arc::new(MemorySink::new());
    pipeline.register_stdout(captured.clone());

    pipeline.start().await.unwrap();
    output
        .write_line(StreamSource::Stdout, "still alive")
        .await
        .unwrap();
    wait_for_lines(&captured, 1).await;

    let started = Instant::now();
    let report = pipeline.stop().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(captured.lines(), vec!["still alive"]);
    // streams never closed
    assert_eq!(report.stdout.produced, None);
    assert!(report.stdout.drained);
    assert_eq!(report.stdout.delivered, 1);

    // late output of the hung child is not relayed
    output
        .write_line(StreamSource::Stdout, "after stop")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(captured.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_is_bounded_when_sink_stalls() {
    let process = MockProcess::new("geth");
    let output = process.output();
    let mut pipeline = Pipeline::new(process, fast_config());

    pipeline.register_stdout(Arc::new(|_line: &str| -> Result<()> {
        std::thread::sleep(Duration::from_secs(1));
        Ok(())
    }));

    pipeline.start().await.unwrap();
    for line in ["slow", "slower"] {
        output.write_line(StreamSource::Stdout, line).await.unwrap();
    }

    let started = Instant::now();
    let report = pipeline.stop().await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(1500));
    assert!(!report.stdout.drained);
    assert!(report.stdout.delivered < 2);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn test_default_stop_budget_covers_hung_process() {
    let config = InterceptConfig::default();
    let budget = config.drain_timeout;
    let process = MockProcess::new("geth").hanging();
    let output = process.output();
    let mut pipeline = Pipeline::new(process, config);

    let captured = Arc::new(MemorySink::new());
    pipeline.register_stdout(captured.clone());

    pipeline.start().await.unwrap();
    output
        .write_line(StreamSource::Stdout, "syncing")
        .await
        .unwrap();
    wait_for_lines(&captured, 1).await;

    let started = Instant::now();
    let report = pipeline.stop().await.unwrap();
    let elapsed = started.elapsed();

    // the open pipe holds the producer for the whole budget, and no longer
    assert!(elapsed >= budget - Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed <= budget + Duration::from_secs(1), "{elapsed:?}");
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(report.stdout.produced, None);
    assert!(report.stdout.drained);
    assert_eq!(report.stdout.delivered, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_default_stop_budget_covers_hung_process_and_stalled_sink() {
    let config = InterceptConfig::default();
    let budget = config.drain_timeout;
    let process = MockProcess::new("geth").hanging();
    let output = process.output();
    let mut pipeline = Pipeline::new(process, config);

    pipeline.register_stdout(Arc::new(|_line: &str| -> Result<()> {
        std::thread::sleep(Duration::from_secs(1));
        Ok(())
    }));

    pipeline.start().await.unwrap();
    for i in 0..8 {
        output
            .write_line(StreamSource::Stdout, &format!("block {i}"))
            .await
            .unwrap();
    }

    let started = Instant::now();
    let report = pipeline.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed <= budget + Duration::from_secs(1), "{elapsed:?}");
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(report.stdout.produced, None);
    assert!(!report.stdout.drained);
    assert!(report.stdout.delivered < 8);
}

#[tokio::test]
async fn test_error_entry_surfaces_in_report() {
    let process = MockProcess::new("geth").hanging();
    let output = process.output();
    let mut pipeline = Pipeline::new(process, fast_config());

    let captured = Arc::new(MemorySink::new());
    pipeline.register_stdout(captured.clone());
    pipeline.start().await.unwrap();

    output
        .write_line(StreamSource::Stdout, "before")
        .await
        .unwrap();
    wait_for_lines(&captured, 1).await;

    pipeline
        .queue(StreamSource::Stdout)
        .enqueue(RelayEntry::Error(InterceptError::TaskFailed(
            "upstream".to_string(),
        )))
        .unwrap();
    pipeline.queue(StreamSource::Stdout).push_line("after").unwrap();

    let report = pipeline.stop().await.unwrap();

    assert_eq!(captured.lines(), vec!["before"]);
    let error = report.stdout.error.as_deref().unwrap();
    assert!(error.contains("upstream"), "{error}");
    assert_eq!(report.stdout.delivered, 1);
    assert!(!report.stdout.drained);
    assert!(report.stderr.error.is_none());
}

#[tokio::test]
async fn test_sink_failure_ends_its_stream_only() {
    let process = MockProcess::new("geth");
    let output = process.output();
    let mut pipeline = Pipeline::new(process, InterceptConfig::default());

    pipeline.register_stdout(Arc::new(|_line: &str| -> Result<()> {
        anyhow::bail!("disk full")
    }));
    let stderr = Arc::new(MemorySink::new());
    pipeline.register_stderr(stderr.clone());

    pipeline.start().await.unwrap();
    output.write_line(StreamSource::Stdout, "x").await.unwrap();
    output.write_line(StreamSource::Stderr, "y").await.unwrap();

    let started = Instant::now();
    let report = pipeline.stop().await.unwrap();

    // the failed consumer ends the drain without waiting out the budget
    assert!(started.elapsed() < Duration::from_secs(2));
    let error = report.stdout.error.as_deref().unwrap();
    assert!(error.contains("disk full"), "{error}");
    assert!(!report.stdout.drained);
    assert_eq!(report.stdout.delivered, 0);
    assert_eq!(stderr.lines(), vec!["y"]);
    assert!(report.stderr.is_clean());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let mut pipeline = Pipeline::new(MockProcess::new("geth"), fast_config());
    pipeline.start().await.unwrap();

    let err = pipeline.start().await.unwrap_err();
    assert!(err.is_contract_violation());
    assert!(matches!(
        err,
        InterceptError::InvalidState {
            operation: "start",
            state: PipelineState::Running
        }
    ));

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.process().lock().await.start_count(), 1);
}

#[tokio::test]
async fn test_stop_before_start_is_rejected() {
    let mut pipeline = Pipeline::new(MockProcess::new("geth"), fast_config());

    let err = pipeline.stop().await.unwrap_err();
    assert!(matches!(
        err,
        InterceptError::InvalidState {
            operation: "stop",
            state: PipelineState::Idle
        }
    ));
    assert_eq!(pipeline.process().lock().await.stop_count(), 0);
}

#[tokio::test]
async fn test_stopped_pipeline_cannot_restart() {
    let mut pipeline = Pipeline::new(MockProcess::new("geth"), fast_config());
    pipeline.start().await.unwrap();
    pipeline.stop().await.unwrap();

    assert!(matches!(
        pipeline.start().await.unwrap_err(),
        InterceptError::InvalidState { .. }
    ));
    assert!(matches!(
        pipeline.stop().await.unwrap_err(),
        InterceptError::InvalidState { .. }
    ));
}

#[tokio::test]
async fn test_missing_stream_fails_start() {
    let process = MockProcess::new("geth").without_stderr();
    let mut pipeline = Pipeline::new(process, fast_config());

    let err = pipeline.start().await.unwrap_err();
    assert!(matches!(
        err,
        InterceptError::MissingStream(StreamSource::Stderr)
    ));
    assert!(err.is_contract_violation());
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    let process = pipeline.process();
    let process = process.lock().await;
    assert_eq!(process.stop_count(), 1);
}

#[tokio::test]
async fn test_process_stop_failure_is_returned_after_shutdown() {
    let process = MockProcess::new("geth").failing_stop();
    let output = process.output();
    let mut pipeline = Pipeline::new(process, fast_config());

    let captured = Arc::new(MemorySink::new());
    pipeline.register_stdout(captured.clone());
    pipeline.start().await.unwrap();
    output.write_line(StreamSource::Stdout, "last").await.unwrap();

    let err = pipeline.stop().await.unwrap_err();
    assert!(matches!(err, InterceptError::Process(_)));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(captured.lines(), vec!["last"]);
}

#[tokio::test]
async fn test_sink_registered_while_running_receives_later_lines() {
    let process = MockProcess::new("geth");
    let output = process.output();
    let mut pipeline = Pipeline::new(process, fast_config());

    let early = Arc::new(MemorySink::new());
    pipeline.register_stdout(early.clone());
    pipeline.start().await.unwrap();

    output.write_line(StreamSource::Stdout, "one").await.unwrap();
    wait_for_lines(&early, 1).await;

    let late = Arc::new(MemorySink::new());
    pipeline.register_stdout(late.clone());
    output.write_line(StreamSource::Stdout, "two").await.unwrap();
    pipeline.stop().await.unwrap();

    assert_eq!(early.lines(), vec!["one", "two"]);
    assert_eq!(late.lines(), vec!["two"]);
}
