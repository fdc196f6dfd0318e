//! Operator event capture.
//!
//! Key presses are mapped to labels, stamped with the wall clock at the moment of
//! mapping, and appended to the LabelLog. Unrecognized keys are ignored.

use std::sync::Arc;

use crate::core::{KeyPress, Label, LabelEvent, StopSignal};
use crate::data::log::LabelLog;
use crate::hardware::capabilities::KeySource;

/// How capture ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The stop signal was observed.
    Stopped {
        /// Labels recorded.
        labels: usize,
        /// Key presses ignored.
        ignored: usize,
    },
    /// The key source ended on its own (e.g. stdin closed).
    InputClosed {
        /// Labels recorded.
        labels: usize,
    },
    /// Subscribing to the key source failed.
    SubscribeFailed(String),
}

/// Callback invoked after each recorded label.
pub type LabelObserver = Arc<dyn Fn(&LabelEvent) + Send + Sync>;

/// The event-capture producer of one session.
pub struct EventCapture {
    keys: Arc<dyn KeySource>,
    log: LabelLog,
    stop: StopSignal,
    observer: Option<LabelObserver>,
}

impl EventCapture {
    /// Builds a capture over the session's LabelLog.
    pub fn new(keys: Arc<dyn KeySource>, log: LabelLog, stop: StopSignal) -> Self {
        Self {
            keys,
            log,
            stop,
            observer: None,
        }
    }

    /// Notifies `observer` of each label as it is recorded.
    pub fn with_observer(mut self, observer: LabelObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Records labels until the stop signal is set, then releases the subscription.
    #[tracing::instrument(name = "event_capture", skip_all)]
    pub async fn run(self) -> CaptureOutcome {
        let mut presses = match self.keys.subscribe().await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "Failed to subscribe to key input");
                return CaptureOutcome::SubscribeFailed(e.to_string());
            }
        };

        let mut labels = 0;
        let mut ignored = 0;
        let outcome = loop {
            if self.stop.is_set() {
                break CaptureOutcome::Stopped { labels, ignored };
            }
            tokio::select! {
                _ = self.stop.wait() => break CaptureOutcome::Stopped { labels, ignored },
                press = presses.recv() => match press {
                    Some(KeyPress(key)) => match self.record(key) {
                        Some(_) => labels += 1,
                        None => ignored += 1,
                    },
                    None => break CaptureOutcome::InputClosed { labels },
                },
            }
        };

        self.keys.unsubscribe().await;
        tracing::debug!(?outcome, "Event capture stopped");
        outcome
    }

    fn record(&self, key: char) -> Option<Label> {
        let label = Label::from_key(key)?;
        let event = LabelEvent::now(label);
        tracing::info!(label = %label, wall_timestamp = event.wall_timestamp, "Label recorded");
        if let Some(observer) = &self.observer {
            observer(&event);
        }
        self.log.append(event);
        Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::ChannelKeySource;
    use std::time::Duration;

    #[tokio::test]
    async fn only_recognized_keys_are_logged() {
        let keys = Arc::new(ChannelKeySource::new());
        let log = LabelLog::new();
        let stop = StopSignal::new();
        let capture = tokio::spawn(EventCapture::new(keys.clone(), log.clone(), stop.clone()).run());

        while !keys.is_subscribed() {
            tokio::task::yield_now().await;
        }
        for key in ['1', 'x', '3', '9', '2'] {
            assert!(keys.press(key).await);
        }
        while log.len() < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        stop.set();

        let outcome = capture.await.unwrap();
        assert_eq!(outcome, CaptureOutcome::Stopped { labels: 3, ignored: 2 });
        let labels: Vec<Label> = log.snapshot().iter().map(|e| e.label).collect();
        assert_eq!(
            labels,
            vec![Label::LostFocus, Label::LectureStarted, Label::FocusedAgain]
        );
        assert_eq!(keys.unsubscribe_count(), 1);
    }
}
