//! Integration tests for the acquisition producer and the hand-off queue.

use focus_recorder::acquisition::{AcquisitionLoop, AcquisitionOutcome, AcquisitionSettings};
use focus_recorder::core::{HandoffBatch, StopSignal};
use focus_recorder::data::handoff::HandoffQueue;
use focus_recorder::data::log::SampleLogs;
use focus_recorder::hardware::mock::{PollStep, ScriptedSource};
use std::sync::Arc;
use std::time::Duration;

fn settings() -> AcquisitionSettings {
    AcquisitionSettings {
        poll_interval: Duration::from_millis(1),
        retry_budget: 3,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

#[tokio::test]
async fn test_full_queue_blocks_producer_without_dropping() {
    let source = Arc::new(ScriptedSource::new(vec![]).then(PollStep::Rows(1)));
    let logs = SampleLogs::new();
    let handoff = Arc::new(HandoffQueue::<HandoffBatch>::new(2));
    let stop = StopSignal::new();

    let task = tokio::spawn(
        AcquisitionLoop::new(
            source.clone(),
            logs.clone(),
            handoff.clone(),
            stop.clone(),
            settings(),
        )
        .run(),
    );

    // Two batches queued, the third appended and waiting for a slot.
    wait_until(|| handoff.len() == 2 && logs.signal_len() == 3).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.poll_count(), 3);
    assert_eq!(handoff.len(), 2);

    let drained = handoff.drain_all();
    assert_eq!(drained.len(), 2);
    wait_until(|| handoff.len() == 2).await;
    assert!(source.poll_count() >= 4);

    stop.set();
    handoff.close();
    let outcome = task.await.unwrap();
    assert!(matches!(outcome, AcquisitionOutcome::Stopped { .. }));
}

#[tokio::test]
async fn test_queue_length_equals_successful_polls() {
    let source = Arc::new(ScriptedSource::new(vec![PollStep::Rows(1); 5]));
    let logs = SampleLogs::new();
    let handoff = Arc::new(HandoffQueue::new(8));
    let stop = StopSignal::new();

    let task = tokio::spawn(
        AcquisitionLoop::new(source, logs.clone(), handoff.clone(), stop.clone(), settings())
            .run(),
    );
    wait_until(|| logs.signal_len() == 5).await;
    stop.set();

    match task.await.unwrap() {
        AcquisitionOutcome::Stopped { rows, .. } => assert_eq!(rows, 5),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(handoff.len(), 5);

    let batches = handoff.drain_all();
    let timestamps: Vec<f64> = batches
        .iter()
        .flat_map(|b| b.timestamps.iter().copied())
        .collect();
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_signal_and_aux_lengths_always_match() {
    let steps = vec![
        PollStep::Rows(2),
        PollStep::Empty,
        PollStep::Rows(7),
        PollStep::Fail("glitch".into()),
        PollStep::Rows(1),
        PollStep::Rows(13),
        PollStep::Empty,
        PollStep::Rows(4),
    ];
    let source = Arc::new(ScriptedSource::new(steps).with_channels(4, 2));
    let logs = SampleLogs::new();
    let handoff = Arc::new(HandoffQueue::new(64));
    let stop = StopSignal::new();

    let task = tokio::spawn(
        AcquisitionLoop::new(source, logs.clone(), handoff.clone(), stop.clone(), settings())
            .run(),
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (signal, aux) = logs.lens();
            assert_eq!(signal, aux);
            if signal == 27 {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("all scripted rows acquired");
    stop.set();
    task.await.unwrap();

    let signal = logs.signal_snapshot();
    let aux = logs.aux_snapshot();
    assert_eq!(signal.len(), 27);
    assert!(signal.iter().all(|r| r.channel_values.len() == 4));
    assert!(aux.iter().all(|r| r.aux_values.len() == 2));
    for (s, a) in signal.iter().zip(&aux) {
        assert_eq!(s.device_timestamp, a.device_timestamp);
    }

    let drained_aux: usize = handoff.drain_all().iter().map(|b| b.aux.len()).sum();
    assert_eq!(drained_aux, 27);
}
