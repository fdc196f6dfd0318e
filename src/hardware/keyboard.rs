//! Operator key input from the terminal.
//!
//! Lines typed on stdin are split into characters; each non-whitespace character
//! is delivered as one `KeyPress`. Ctrl+C stays with the process signal handler.
//!
//! Reading happens on a dedicated OS thread rather than on the tokio blocking
//! pool: a read parked on an idle terminal cannot be cancelled, and a pool thread
//! stuck there would keep the runtime from shutting down.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::KeyPress;
use crate::hardware::capabilities::KeySource;

const KEY_CHANNEL_CAPACITY: usize = 64;

type InputFactory = Box<dyn FnOnce() -> Box<dyn BufRead> + Send>;

/// Key presses read line by line from standard input (or any `BufRead`).
pub struct StdinKeySource {
    input: Mutex<Option<InputFactory>>,
    released: Mutex<Option<Arc<AtomicBool>>>,
}

impl Default for StdinKeySource {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinKeySource {
    /// Reads from the process's standard input.
    pub fn new() -> Self {
        Self::with_input(Box::new(|| -> Box<dyn BufRead> {
            Box::new(std::io::stdin().lock())
        }))
    }

    /// Reads from `reader` instead of stdin.
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self::with_input(Box::new(move || -> Box<dyn BufRead> { Box::new(reader) }))
    }

    fn with_input(input: InputFactory) -> Self {
        Self {
            input: Mutex::new(Some(input)),
            released: Mutex::new(None),
        }
    }
}

fn read_keys(input: Box<dyn BufRead>, tx: mpsc::Sender<KeyPress>, released: Arc<AtomicBool>) {
    for line in input.lines() {
        if released.load(Ordering::SeqCst) {
            return;
        }
        match line {
            Ok(line) => {
                for key in line.chars().filter(|c| !c.is_whitespace()) {
                    if tx.blocking_send(KeyPress(key)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read key input");
                return;
            }
        }
    }
    tracing::debug!("Key input closed, no more key presses");
}

#[async_trait]
impl KeySource for StdinKeySource {
    async fn subscribe(&self) -> Result<mpsc::Receiver<KeyPress>> {
        let Some(open) = self.input.lock().take() else {
            bail!("key input is already subscribed");
        };

        let (tx, rx) = mpsc::channel(KEY_CHANNEL_CAPACITY);
        let released = Arc::new(AtomicBool::new(false));
        *self.released.lock() = Some(Arc::clone(&released));

        // Detached: a read blocked on the terminal ends with the process.
        std::thread::Builder::new()
            .name("key-input".to_string())
            .spawn(move || read_keys(open(), tx, released))
            .context("spawning key input thread")?;
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        if let Some(released) = self.released.lock().take() {
            released.store(true, Ordering::SeqCst);
        }
    }
}
