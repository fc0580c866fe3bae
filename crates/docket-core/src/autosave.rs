use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

use crate::datastore::SaveTarget;
use crate::store::{ChangeEvent, Listener, StoreReader};
use crate::timer::{self, TimerHandle};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

pub const SAVED_MESSAGE: &str = "All changes saved";
pub const SAVING_MESSAGE: &str = "Saving…";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    PendingSave,
    Saving,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Saved,
    Saving,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveStatus {
    pub severity: Severity,
    pub message: String,
}

impl SaveStatus {
    pub fn saved() -> Self {
        Self {
            severity: Severity::Saved,
            message: SAVED_MESSAGE.to_string(),
        }
    }

    pub fn saving() -> Self {
        Self {
            severity: Severity::Saving,
            message: SAVING_MESSAGE.to_string(),
        }
    }

    pub fn failed(err: &anyhow::Error) -> Self {
        Self {
            severity: Severity::Error,
            message: format!("Error: {err:#}"),
        }
    }
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

struct Inner {
    state: SaveState,
    // Bumped on every accepted change; a finishing save only reports if it
    // is still the latest.
    generation: u64,
    timer: Option<TimerHandle>,
    // Highest generation a successful save has covered.
    saved: u64,
}

struct Shared {
    target: Arc<dyn SaveTarget>,
    source: StoreReader,
    inner: Mutex<Inner>,
    lane: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<SaveStatus>,
    attempts: AtomicU64,
}

/// Debounces store changes into background saves and reports their outcome.
///
/// Starts disabled so the initial load is not written straight back; call
/// [`AutoSaver::enable`] once loading has finished.
pub struct AutoSaver {
    runtime: Handle,
    delay: Duration,
    enabled: AtomicBool,
    shared: Arc<Shared>,
}

impl AutoSaver {
    pub fn new(runtime: Handle, target: Arc<dyn SaveTarget>, source: StoreReader, delay: Duration) -> Self {
        let (status_tx, _) = watch::channel(SaveStatus::saved());
        Self {
            runtime,
            delay,
            enabled: AtomicBool::new(false),
            shared: Arc::new(Shared {
                target,
                source,
                inner: Mutex::new(Inner {
                    state: SaveState::Idle,
                    generation: 0,
                    timer: None,
                    saved: 0,
                }),
                lane: tokio::sync::Mutex::new(()),
                status_tx,
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Store listener forwarding every change to `saver`.
    pub fn listener(saver: &Arc<AutoSaver>) -> Listener {
        let saver = Arc::clone(saver);
        Box::new(move |event| saver.notify_change(event))
    }

    /// Returns false if auto-save was already enabled.
    pub fn enable(&self) -> bool {
        let first = !self.enabled.swap(true, Ordering::SeqCst);
        if first {
            info!(delay_ms = self.delay.as_millis() as u64, "autosave enabled");
        } else {
            debug!("autosave already enabled");
        }
        first
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn state(&self) -> SaveState {
        self.shared.inner.lock().state
    }

    pub fn status(&self) -> SaveStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Number of saves started so far, successful or not.
    pub fn save_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn notify_change(&self, event: &ChangeEvent) {
        if !self.is_enabled() {
            trace!(event = ?event, "autosave disabled; change ignored");
            return;
        }

        let mut inner = self.shared.inner.lock();
        inner.generation += 1;
        inner.state = SaveState::PendingSave;
        let generation = inner.generation;
        self.shared.status_tx.send_replace(SaveStatus::saving());

        let shared = Arc::clone(&self.shared);
        timer::rearm(&mut inner.timer, &self.runtime, self.delay, async move {
            // Failures are already reported through the status.
            let _ = shared.run_save(generation).await;
        });
        debug!(event = ?event, generation, "save debounce armed");
    }

    /// Saves now if a debounced save is pending; waits for one in flight.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let (state, generation) = {
            let mut inner = self.shared.inner.lock();
            if let Some(timer) = inner.timer.take() {
                timer.cancel();
            }
            (inner.state, inner.generation)
        };

        match state {
            SaveState::PendingSave => {
                debug!(generation, "flushing pending save");
                Arc::clone(&self.shared).run_save(generation).await
            }
            SaveState::Saving => {
                let _lane = self.shared.lane.lock().await;
                Ok(())
            }
            SaveState::Idle | SaveState::Error => Ok(()),
        }
    }
}

impl Shared {
    async fn run_save(self: Arc<Self>, generation: u64) -> anyhow::Result<()> {
        let _lane = self.lane.lock().await;
        // A fired timer and a flush can both queue the same generation.
        if self.inner.lock().saved >= generation {
            trace!(generation, "generation already saved; skipping");
            return Ok(());
        }
        self.transition(generation, SaveState::Saving, None);

        // Snapshot under the store's read lock, then release it before the
        // slow part.
        let snapshot = self.source.snapshot();
        let count = snapshot.len();
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let target = Arc::clone(&self.target);
        let result = tokio::task::spawn_blocking(move || target.save(&snapshot))
            .await
            .map_err(|err| anyhow!("save task failed: {err}"))
            .and_then(|saved| saved);

        match &result {
            Ok(()) => {
                info!(count, generation, "tasks saved");
                {
                    let mut inner = self.inner.lock();
                    inner.saved = inner.saved.max(generation);
                }
                self.transition(generation, SaveState::Idle, Some(SaveStatus::saved()));
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), generation, "autosave failed");
                self.transition(generation, SaveState::Error, Some(SaveStatus::failed(err)));
            }
        }
        result
    }

    fn transition(&self, generation: u64, state: SaveState, status: Option<SaveStatus>) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!(
                generation,
                latest = inner.generation,
                "newer change pending; leaving state alone"
            );
            return;
        }
        inner.state = state;
        if let Some(status) = status {
            self.status_tx.send_replace(status);
        }
    }
}
