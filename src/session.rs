//! Session lifecycle.
//!
//! `SessionController` owns every buffer of one recording session and drives it
//! through `Idle -> Running -> Stopping -> Flushed`:
//!
//! - **start**: spawns the acquisition loop and event capture as tokio tasks that
//!   share the session's `StopSignal`.
//! - **wait_for_stop**: resolves on the operator's termination request or on an
//!   acquisition failure, whichever comes first.
//! - **shutdown**: sets the stop signal, waits (bounded) for both producers,
//!   aborts any that hang, then drains the hand-off queue, snapshots the logs and
//!   hands the three datasets to the `SessionWriter`.
//!
//! The flush runs at most once. Further `shutdown` calls return the cached report.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::acquisition::{
    AcquisitionFailure, AcquisitionLoop, AcquisitionOutcome, AcquisitionSettings,
};
use crate::capture::{CaptureOutcome, EventCapture, LabelObserver};
use crate::config::AcquisitionConfig;
use crate::core::{AuxRow, HandoffBatch, SessionId, StopSignal};
use crate::data::handoff::HandoffQueue;
use crate::data::log::{LabelLog, SampleLogs};
use crate::data::storage::{DatasetKind, SessionWriter};
use crate::error::{AppResult, RecorderError};
use crate::hardware::capabilities::{KeySource, SampleSource};
use crate::metadata::SessionMetadata;

/// Lifecycle states of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, producers not started.
    Idle,
    /// Producers running.
    Running,
    /// Stop requested, producers winding down.
    Stopping,
    /// Datasets handed to the writer. Terminal.
    Flushed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Flushed => "flushed",
        };
        f.write_str(name)
    }
}

/// Why the session left `Running`.
#[derive(Clone, Debug, PartialEq)]
pub enum StopReason {
    /// The operator asked to stop.
    OperatorInterrupt,
    /// The acquisition loop exhausted its retry budget.
    AcquisitionFailed(AcquisitionFailure),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::OperatorInterrupt => f.write_str("operator interrupt"),
            StopReason::AcquisitionFailed(failure) => write!(
                f,
                "acquisition failed after {} consecutive attempts: {}",
                failure.attempts, failure.last_error
            ),
        }
    }
}

/// The concurrent producers of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Producer {
    /// The polling acquisition loop.
    Acquisition,
    /// Operator key capture.
    EventCapture,
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Acquisition => f.write_str("acquisition"),
            Producer::EventCapture => f.write_str("event capture"),
        }
    }
}

/// Outcome of writing one dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetReport {
    /// Which dataset.
    pub kind: DatasetKind,
    /// Rows handed to the writer.
    pub rows: usize,
    /// Artifact location, or the error message.
    pub result: Result<String, String>,
}

impl DatasetReport {
    /// Operator-facing confirmation line.
    pub fn message(&self) -> String {
        match &self.result {
            Ok(location) => format!("{} saved to {} ({} rows)", self.kind, location, self.rows),
            Err(e) => format!("{} could not be saved: {}", self.kind, e),
        }
    }
}

/// Result of the terminal flush.
#[derive(Clone, Debug)]
pub struct FlushReport {
    /// Identifiers of the session.
    pub session: SessionId,
    /// Why the session stopped.
    pub stop_reason: StopReason,
    /// One entry per dataset, in write order.
    pub datasets: Vec<DatasetReport>,
    /// Producers that were aborted after the stop timeout.
    pub abandoned: Vec<Producer>,
    /// How the acquisition loop ended, if it acknowledged the stop.
    pub acquisition: Option<AcquisitionOutcome>,
    /// How event capture ended, if it acknowledged the stop.
    pub capture: Option<CaptureOutcome>,
    /// Manifest location, when one was written.
    pub manifest: Option<String>,
}

impl FlushReport {
    /// True when every dataset was written.
    pub fn is_success(&self) -> bool {
        self.datasets.iter().all(|d| d.result.is_ok())
    }

    /// Messages of the datasets that failed.
    pub fn failures(&self) -> Vec<String> {
        self.datasets
            .iter()
            .filter_map(|d| d.result.as_ref().err().map(|e| format!("{}: {}", d.kind, e)))
            .collect()
    }

    /// Report of one dataset.
    pub fn dataset(&self, kind: DatasetKind) -> Option<&DatasetReport> {
        self.datasets.iter().find(|d| d.kind == kind)
    }

    /// Converts the outcome into an error when the session did not end cleanly.
    ///
    /// Dataset failures win over an acquisition failure: they mean data was lost,
    /// while rows captured before an acquisition failure are still on disk.
    pub fn into_result(self) -> AppResult<Self> {
        if !self.is_success() {
            return Err(RecorderError::PersistenceFailed(self.failures()));
        }
        match &self.stop_reason {
            StopReason::AcquisitionFailed(failure) => Err(failure.clone().into()),
            StopReason::OperatorInterrupt => Ok(self),
        }
    }
}

/// Tunables of a session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Acquisition loop timing and retry policy.
    pub acquisition: AcquisitionSettings,
    /// Hand-off queue capacity in poll batches.
    pub handoff_capacity: usize,
    /// How long each producer gets to acknowledge the stop.
    pub stop_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&AcquisitionConfig::default())
    }
}

impl SessionOptions {
    /// Options from the `[acquisition]` configuration section.
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            acquisition: config.settings(),
            handoff_capacity: config.handoff_capacity,
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// Owns and coordinates one recording session.
pub struct SessionController {
    session: SessionId,
    options: SessionOptions,
    state: SessionState,
    stop: StopSignal,
    logs: SampleLogs,
    labels: LabelLog,
    handoff: Arc<HandoffQueue<HandoffBatch>>,
    source: Arc<dyn SampleSource>,
    keys: Arc<dyn KeySource>,
    writer: Arc<dyn SessionWriter>,
    label_observer: Option<LabelObserver>,
    acquisition: Option<JoinHandle<AcquisitionOutcome>>,
    capture: Option<JoinHandle<CaptureOutcome>>,
    failure_rx: Option<oneshot::Receiver<AcquisitionFailure>>,
    metadata: SessionMetadata,
    report: Option<FlushReport>,
}

impl SessionController {
    /// Creates an idle session with its own logs, queue and stop signal.
    pub fn new(
        session: SessionId,
        options: SessionOptions,
        source: Arc<dyn SampleSource>,
        keys: Arc<dyn KeySource>,
        writer: Arc<dyn SessionWriter>,
    ) -> Self {
        let metadata = SessionMetadata::new(&session, source.describe());
        let handoff = Arc::new(HandoffQueue::new(options.handoff_capacity));
        Self {
            session,
            options,
            state: SessionState::Idle,
            stop: StopSignal::new(),
            logs: SampleLogs::new(),
            labels: LabelLog::new(),
            handoff,
            source,
            keys,
            writer,
            label_observer: None,
            acquisition: None,
            capture: None,
            failure_rx: None,
            metadata,
            report: None,
        }
    }

    /// Notifies `observer` of each label as it is recorded.
    pub fn with_label_observer(mut self, observer: LabelObserver) -> Self {
        self.label_observer = Some(observer);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session identifiers.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Handle on the session's stop signal. Setting it is a termination request.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Shared SignalLog/AuxLog.
    pub fn sample_logs(&self) -> &SampleLogs {
        &self.logs
    }

    /// Shared LabelLog.
    pub fn label_log(&self) -> &LabelLog {
        &self.labels
    }

    /// Batches waiting in the hand-off queue.
    pub fn handoff_len(&self) -> usize {
        self.handoff.len()
    }

    /// Requests termination. Returns `false` if a stop was already requested.
    pub fn request_stop(&self) -> bool {
        self.stop.set()
    }

    /// `Idle -> Running`: launches both producers.
    pub fn start(&mut self) -> AppResult<()> {
        if self.state != SessionState::Idle {
            return Err(RecorderError::InvalidTransition {
                from: self.state.to_string(),
                action: "start",
            });
        }

        let (failure_tx, failure_rx) = oneshot::channel();
        let acquisition = AcquisitionLoop::new(
            Arc::clone(&self.source),
            self.logs.clone(),
            Arc::clone(&self.handoff),
            self.stop.clone(),
            self.options.acquisition.clone(),
        )
        .with_failure_notifier(failure_tx);

        let mut capture =
            EventCapture::new(Arc::clone(&self.keys), self.labels.clone(), self.stop.clone());
        if let Some(observer) = &self.label_observer {
            capture = capture.with_observer(Arc::clone(observer));
        }

        self.acquisition = Some(tokio::spawn(acquisition.run()));
        self.capture = Some(tokio::spawn(capture.run()));
        self.failure_rx = Some(failure_rx);
        self.metadata.mark_started();
        self.state = SessionState::Running;
        tracing::info!(session = %self.session, device = %self.source.describe(), "Session started");
        Ok(())
    }

    /// Waits for `termination`, a stop request on the session's signal, or an
    /// acquisition failure. The failure channel is consumed by the first call.
    pub async fn wait_for_stop<F>(&mut self, termination: F) -> StopReason
    where
        F: Future<Output = ()>,
    {
        let stop = self.stop.clone();
        let failure_rx = self.failure_rx.take();
        let failure = async move {
            if let Some(rx) = failure_rx {
                if let Ok(failure) = rx.await {
                    return failure;
                }
            }
            std::future::pending().await
        };

        let reason = tokio::select! {
            _ = termination => StopReason::OperatorInterrupt,
            _ = stop.wait() => StopReason::OperatorInterrupt,
            failure = failure => StopReason::AcquisitionFailed(failure),
        };
        tracing::info!(reason = %reason, "Termination requested");
        reason
    }

    /// `Running -> Stopping -> Flushed`: stops the producers and persists the
    /// datasets exactly once.
    pub async fn shutdown(&mut self, reason: StopReason) -> FlushReport {
        if let Some(report) = &self.report {
            tracing::debug!("Session already flushed, skipping persistence");
            return report.clone();
        }

        tracing::debug!(from = %self.state, "Session stopping");
        self.state = SessionState::Stopping;
        self.stop.set();

        let timeout = self.options.stop_timeout;
        let (acquisition, capture) = tokio::join!(
            join_producer(Producer::Acquisition, self.acquisition.take(), timeout),
            join_producer(Producer::EventCapture, self.capture.take(), timeout),
        );
        let mut abandoned = Vec::new();
        let acquisition = match acquisition {
            Joined::Finished(outcome) => Some(outcome),
            Joined::NotStarted => None,
            Joined::Abandoned => {
                abandoned.push(Producer::Acquisition);
                None
            }
        };
        let capture = match capture {
            Joined::Finished(outcome) => Some(outcome),
            Joined::NotStarted => None,
            Joined::Abandoned => {
                abandoned.push(Producer::EventCapture);
                None
            }
        };

        if let Err(e) = self.source.close().await {
            tracing::warn!(error = %e, "Failed to release sample source");
        }
        self.keys.unsubscribe().await;

        let report = self.flush(reason, abandoned, acquisition, capture).await;
        self.state = SessionState::Flushed;
        tracing::debug!("Session flushed");
        self.report = Some(report.clone());
        report
    }

    /// Starts the session, waits for `termination` or a failure, then flushes.
    pub async fn run<F>(mut self, termination: F) -> AppResult<FlushReport>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        let reason = self.wait_for_stop(termination).await;
        Ok(self.shutdown(reason).await)
    }

    async fn flush(
        &mut self,
        reason: StopReason,
        abandoned: Vec<Producer>,
        acquisition: Option<AcquisitionOutcome>,
        capture: Option<CaptureOutcome>,
    ) -> FlushReport {
        let batches = self.handoff.drain_all();
        self.handoff.close();
        let aux: Vec<AuxRow> = batches.into_iter().flat_map(|batch| batch.aux).collect();
        let signal = self.logs.signal_snapshot();
        let labels = self.labels.snapshot();

        if aux.len() != signal.len() {
            tracing::warn!(
                signal_rows = signal.len(),
                aux_rows = aux.len(),
                "Drained aux rows do not match the signal log"
            );
        }

        let mut datasets = Vec::with_capacity(3);
        let written = self.writer.write_labels(&self.session, &labels).await;
        datasets.push(dataset_report(DatasetKind::Labels, labels.len(), written));
        let written = self.writer.write_signal(&self.session, &signal).await;
        datasets.push(dataset_report(DatasetKind::Signal, signal.len(), written));
        let written = self.writer.write_aux(&self.session, &aux).await;
        datasets.push(dataset_report(DatasetKind::Aux, aux.len(), written));

        self.metadata.mark_stopped(reason.to_string());
        for dataset in &datasets {
            self.metadata.set_rows(dataset.kind.display_name(), dataset.rows);
        }
        self.metadata.abandoned_producers = abandoned.iter().map(|p| p.to_string()).collect();
        let manifest = match self.writer.write_manifest(&self.session, &self.metadata).await {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write session manifest");
                None
            }
        };

        FlushReport {
            session: self.session.clone(),
            stop_reason: reason,
            datasets,
            abandoned,
            acquisition,
            capture,
            manifest,
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop.set();
        if let Some(handle) = self.acquisition.take() {
            handle.abort();
        }
        if let Some(handle) = self.capture.take() {
            handle.abort();
        }
    }
}

enum Joined<T> {
    NotStarted,
    Finished(T),
    Abandoned,
}

async fn join_producer<T>(
    producer: Producer,
    handle: Option<JoinHandle<T>>,
    timeout: Duration,
) -> Joined<T> {
    let Some(mut handle) = handle else {
        return Joined::NotStarted;
    };
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(outcome)) => Joined::Finished(outcome),
        Ok(Err(e)) => {
            tracing::warn!(%producer, error = %e, "Producer task ended abnormally");
            Joined::Abandoned
        }
        Err(_) => {
            tracing::warn!(
                %producer,
                timeout_ms = timeout.as_millis() as u64,
                "Producer did not stop in time, abandoning"
            );
            handle.abort();
            Joined::Abandoned
        }
    }
}

fn dataset_report(kind: DatasetKind, rows: usize, written: AppResult<String>) -> DatasetReport {
    let result = written.map_err(|e| {
        tracing::error!(dataset = %kind, error = %e, "Failed to persist dataset");
        e.to_string()
    });
    DatasetReport { kind, rows, result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::KeyPress;
    use crate::data::storage::MemorySessionWriter;
    use crate::hardware::keyboard::StdinKeySource;
    use crate::hardware::mock::{ChannelKeySource, PollStep, ScriptedSource};
    use tracing_test::traced_test;

    fn options() -> SessionOptions {
        SessionOptions {
            acquisition: AcquisitionSettings {
                poll_interval: Duration::from_millis(1),
                retry_budget: 3,
            },
            handoff_capacity: 64,
            stop_timeout: Duration::from_millis(200),
        }
    }

    fn controller_with(
        source: Arc<dyn SampleSource>,
        keys: Arc<dyn KeySource>,
    ) -> (SessionController, Arc<MemorySessionWriter>) {
        let writer = Arc::new(MemorySessionWriter::new());
        let controller = SessionController::new(
            SessionId::new("unit", 1).unwrap(),
            options(),
            source,
            keys,
            writer.clone(),
        );
        (controller, writer)
    }

    fn controller(source: ScriptedSource) -> (SessionController, Arc<MemorySessionWriter>) {
        controller_with(Arc::new(source), Arc::new(ChannelKeySource::new()))
    }

    /// Key source whose subscription never completes.
    struct StalledKeySource;

    #[async_trait::async_trait]
    impl KeySource for StalledKeySource {
        async fn subscribe(&self) -> anyhow::Result<tokio::sync::mpsc::Receiver<KeyPress>> {
            std::future::pending().await
        }

        async fn unsubscribe(&self) {}
    }

    /// Blocks every read until the paired sender is dropped.
    struct IdleTerminal(std::sync::mpsc::Receiver<()>);

    impl std::io::Read for IdleTerminal {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[tokio::test]
    async fn start_is_only_allowed_from_idle() {
        let (mut session, _) = controller(ScriptedSource::new(vec![]));
        assert_eq!(session.state(), SessionState::Idle);
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(matches!(
            session.start(),
            Err(RecorderError::InvalidTransition { .. })
        ));

        session.shutdown(StopReason::OperatorInterrupt).await;
        assert_eq!(session.state(), SessionState::Flushed);
        assert!(session.start().is_err());
    }

    #[tokio::test]
    async fn shutdown_from_idle_writes_empty_datasets() {
        let (mut session, writer) = controller(ScriptedSource::new(vec![PollStep::Rows(3)]));
        let report = session.shutdown(StopReason::OperatorInterrupt).await;
        assert!(report.is_success());
        assert!(report.abandoned.is_empty());
        assert!(report.acquisition.is_none());
        assert_eq!(writer.write_count(), 3);
        assert!(writer.signal().is_empty());
        assert!(writer.labels().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn hung_producer_is_abandoned_and_prior_rows_kept() {
        let source = Arc::new(ScriptedSource::new(vec![PollStep::Rows(2)]).then(PollStep::Hang));
        let (mut session, writer) =
            controller_with(source.clone(), Arc::new(ChannelKeySource::new()));
        session.start().unwrap();
        // The second poll is the one that never returns.
        while session.sample_logs().signal_len() < 2 || source.poll_count() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let report = session.shutdown(StopReason::OperatorInterrupt).await;
        assert_eq!(report.abandoned, vec![Producer::Acquisition]);
        assert!(report.acquisition.is_none());
        assert!(matches!(report.capture, Some(CaptureOutcome::Stopped { .. })));
        assert!(report.is_success());
        assert_eq!(writer.signal().len(), 2);
        assert_eq!(writer.aux().len(), 2);
        assert_eq!(
            writer.manifest().map(|m| m.abandoned_producers),
            Some(vec!["acquisition".to_string()])
        );
        assert!(logs_contain("Producer did not stop in time"));
    }

    #[tokio::test]
    #[traced_test]
    async fn stalled_key_subscription_abandons_event_capture() {
        let (mut session, writer) = controller_with(
            Arc::new(ScriptedSource::new(vec![PollStep::Rows(3)])),
            Arc::new(StalledKeySource),
        );
        session.start().unwrap();
        while session.sample_logs().signal_len() < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let report = session.shutdown(StopReason::OperatorInterrupt).await;
        assert_eq!(report.abandoned, vec![Producer::EventCapture]);
        assert!(report.capture.is_none());
        assert!(matches!(report.acquisition, Some(AcquisitionOutcome::Stopped { .. })));
        assert_eq!(writer.signal().len(), 3);
        assert!(writer.labels().is_empty());
        assert!(logs_contain("Producer did not stop in time"));
    }

    #[tokio::test]
    async fn idle_terminal_input_does_not_hold_up_shutdown() {
        let (_hold, idle) = std::sync::mpsc::channel();
        let keys = StdinKeySource::from_reader(std::io::BufReader::new(IdleTerminal(idle)));
        let (mut session, _) = controller_with(
            Arc::new(ScriptedSource::new(vec![PollStep::Rows(1)])),
            Arc::new(keys),
        );
        session.start().unwrap();
        while session.sample_logs().signal_len() < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            session.shutdown(StopReason::OperatorInterrupt),
        )
        .await
        .unwrap();
        assert!(report.abandoned.is_empty());
        assert!(matches!(report.capture, Some(CaptureOutcome::Stopped { .. })));
    }

    #[test]
    fn report_collects_failures() {
        let report = FlushReport {
            session: SessionId::new("s", 1).unwrap(),
            stop_reason: StopReason::OperatorInterrupt,
            datasets: vec![
                DatasetReport {
                    kind: DatasetKind::Labels,
                    rows: 0,
                    result: Ok("labels.csv".into()),
                },
                DatasetReport {
                    kind: DatasetKind::Signal,
                    rows: 5,
                    result: Err("disk full".into()),
                },
            ],
            abandoned: vec![],
            acquisition: None,
            capture: None,
            manifest: None,
        };
        assert!(!report.is_success());
        assert_eq!(report.failures(), vec!["EEG data: disk full".to_string()]);
        assert_eq!(
            report.dataset(DatasetKind::Labels).map(|d| d.message()),
            Some("Labels saved to labels.csv (0 rows)".to_string())
        );
        assert!(matches!(
            report.into_result(),
            Err(RecorderError::PersistenceFailed(_))
        ));
    }

    #[test]
    fn stop_reason_display() {
        let reason = StopReason::AcquisitionFailed(AcquisitionFailure {
            attempts: 4,
            last_error: "timeout".into(),
        });
        assert_eq!(
            reason.to_string(),
            "acquisition failed after 4 consecutive attempts: timeout"
        );
        assert_eq!(StopReason::OperatorInterrupt.to_string(), "operator interrupt");
    }
}
