//! Polling producer that drains the sample source into the session buffers.
//!
//! Each non-empty poll is split into paired rows, appended to the SignalLog/AuxLog
//! and pushed onto the hand-off queue. A full queue suspends the loop instead of
//! dropping data. Poll failures are retried on the next tick until more than
//! `retry_budget` of them happen in a row, at which point the loop reports
//! `AcquisitionFailed` to the controller and exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::core::{HandoffBatch, StopSignal};
use crate::data::handoff::HandoffQueue;
use crate::data::log::SampleLogs;
use crate::error::{AppResult, RecorderError};
use crate::hardware::capabilities::SampleSource;

/// Timing and retry policy of the loop.
#[derive(Clone, Debug)]
pub struct AcquisitionSettings {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before giving up.
    pub retry_budget: u32,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            retry_budget: 3,
        }
    }
}

/// Why acquisition gave up.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionFailure {
    /// Consecutive failed polls, including the last one.
    pub attempts: u32,
    /// Message of the last failure.
    pub last_error: String,
}

impl From<AcquisitionFailure> for RecorderError {
    fn from(value: AcquisitionFailure) -> Self {
        RecorderError::AcquisitionFailed {
            attempts: value.attempts,
            last_error: value.last_error,
        }
    }
}

/// How the loop ended.
#[derive(Clone, Debug, PartialEq)]
pub enum AcquisitionOutcome {
    /// The stop signal was observed.
    Stopped {
        /// Polls performed.
        polls: u64,
        /// Rows appended.
        rows: usize,
    },
    /// The retry budget was exhausted.
    Failed(AcquisitionFailure),
}

/// The acquisition producer of one session.
pub struct AcquisitionLoop {
    source: Arc<dyn SampleSource>,
    logs: SampleLogs,
    handoff: Arc<HandoffQueue<HandoffBatch>>,
    stop: StopSignal,
    settings: AcquisitionSettings,
    failure_tx: Option<oneshot::Sender<AcquisitionFailure>>,
}

impl AcquisitionLoop {
    /// Builds a loop over shared session buffers.
    pub fn new(
        source: Arc<dyn SampleSource>,
        logs: SampleLogs,
        handoff: Arc<HandoffQueue<HandoffBatch>>,
        stop: StopSignal,
        settings: AcquisitionSettings,
    ) -> Self {
        Self {
            source,
            logs,
            handoff,
            stop,
            settings,
            failure_tx: None,
        }
    }

    /// Channel on which an exhausted retry budget is reported.
    pub fn with_failure_notifier(mut self, tx: oneshot::Sender<AcquisitionFailure>) -> Self {
        self.failure_tx = Some(tx);
        self
    }

    /// Polls until the stop signal is set or the retry budget is exhausted.
    #[tracing::instrument(name = "acquisition", skip_all)]
    pub async fn run(mut self) -> AcquisitionOutcome {
        let mut polls: u64 = 0;
        let mut rows: usize = 0;
        let mut consecutive_failures: u32 = 0;

        while !self.stop.is_set() {
            polls += 1;
            match self.poll_once().await {
                Ok(appended) => {
                    consecutive_failures = 0;
                    rows += appended;
                }
                Err(RecorderError::QueueClosed) => {
                    tracing::debug!("Hand-off queue closed, leaving acquisition loop");
                    break;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        attempt = consecutive_failures,
                        budget = self.settings.retry_budget,
                        error = %e,
                        "Sample poll failed"
                    );
                    if consecutive_failures > self.settings.retry_budget {
                        let failure = AcquisitionFailure {
                            attempts: consecutive_failures,
                            last_error: e.to_string(),
                        };
                        tracing::error!(
                            attempts = failure.attempts,
                            error = %failure.last_error,
                            "Acquisition failed, retry budget exhausted"
                        );
                        if let Some(tx) = self.failure_tx.take() {
                            let _ = tx.send(failure.clone());
                        }
                        return AcquisitionOutcome::Failed(failure);
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = self.stop.wait() => break,
            }
        }

        tracing::debug!(polls, rows, "Acquisition loop stopped");
        AcquisitionOutcome::Stopped { polls, rows }
    }

    async fn poll_once(&self) -> AppResult<usize> {
        let batch = self
            .source
            .poll()
            .await
            .map_err(|e| RecorderError::Device(format!("{e:#}")))?;
        if batch.is_empty() {
            return Ok(0);
        }

        let (samples, aux) = batch.split()?;
        let appended = samples.len();
        self.logs.append(&samples, &aux)?;
        let handoff_batch = HandoffBatch {
            samples,
            aux,
            timestamps: batch.timestamps,
        };
        if let Err(pending) = self.handoff.try_push(handoff_batch) {
            if self.handoff.is_closed() {
                return Err(RecorderError::QueueClosed);
            }
            tracing::warn!(
                capacity = self.handoff.capacity(),
                "Hand-off queue full, acquisition waiting for space"
            );
            self.handoff.push(pending).await?;
        }
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{PollStep, ScriptedSource};
    use tracing_test::traced_test;

    fn fast() -> AcquisitionSettings {
        AcquisitionSettings {
            poll_interval: Duration::from_millis(1),
            retry_budget: 3,
        }
    }

    #[tokio::test]
    async fn exhausted_budget_reports_failure() {
        let source = Arc::new(ScriptedSource::new(vec![]).then(PollStep::Fail("unplugged".into())));
        let (tx, rx) = oneshot::channel();
        let acquisition = AcquisitionLoop::new(
            source.clone(),
            SampleLogs::new(),
            Arc::new(HandoffQueue::new(8)),
            StopSignal::new(),
            fast(),
        )
        .with_failure_notifier(tx);

        let outcome = acquisition.run().await;
        let failure = rx.await.unwrap();
        assert_eq!(failure.attempts, 4);
        assert!(failure.last_error.contains("unplugged"));
        assert_eq!(outcome, AcquisitionOutcome::Failed(failure));
        assert_eq!(source.poll_count(), 4);
    }

    #[tokio::test]
    async fn successful_poll_resets_failure_count() {
        let source = Arc::new(
            ScriptedSource::new(vec![
                PollStep::Fail("a".into()),
                PollStep::Fail("b".into()),
                PollStep::Fail("c".into()),
                PollStep::Rows(1),
                PollStep::Fail("d".into()),
                PollStep::Fail("e".into()),
                PollStep::Fail("f".into()),
            ])
            .then(PollStep::Fail("g".into())),
        );
        let logs = SampleLogs::new();
        let outcome = AcquisitionLoop::new(
            source.clone(),
            logs.clone(),
            Arc::new(HandoffQueue::new(8)),
            StopSignal::new(),
            fast(),
        )
        .run()
        .await;

        match outcome {
            AcquisitionOutcome::Failed(failure) => assert_eq!(failure.attempts, 4),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(source.poll_count(), 8);
        assert_eq!(logs.lens(), (1, 1));
    }

    #[tokio::test]
    async fn preset_stop_signal_skips_polling() {
        let source = Arc::new(ScriptedSource::new(vec![PollStep::Rows(5)]));
        let stop = StopSignal::new();
        stop.set();
        let outcome = AcquisitionLoop::new(
            source.clone(),
            SampleLogs::new(),
            Arc::new(HandoffQueue::new(8)),
            stop,
            fast(),
        )
        .run()
        .await;
        assert_eq!(outcome, AcquisitionOutcome::Stopped { polls: 0, rows: 0 });
        assert_eq!(source.poll_count(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn full_queue_is_logged_before_waiting() {
        let source = Arc::new(ScriptedSource::new(vec![]).then(PollStep::Rows(1)));
        let logs = SampleLogs::new();
        let handoff = Arc::new(HandoffQueue::new(1));
        let stop = StopSignal::new();
        let acquisition = AcquisitionLoop::new(
            source,
            logs.clone(),
            handoff.clone(),
            stop.clone(),
            fast(),
        );

        let release = async {
            while logs.signal_len() < 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(handoff.len(), 1);
            stop.set();
            handoff.close();
        };
        let (outcome, ()) = tokio::join!(acquisition.run(), release);

        assert!(matches!(outcome, AcquisitionOutcome::Stopped { .. }));
        assert_eq!(logs.signal_len(), 2);
        assert!(logs_contain("Hand-off queue full"));
    }
}
