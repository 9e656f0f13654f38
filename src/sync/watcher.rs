// ABOUTME: ChangeWatcher - background task that runs a sync pass on upstream changes
// ABOUTME: Explicit start/stop handle with a cancellation token and bounded stop join

use futures::{FutureExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::orchestrator::{PassReport, SyncOrchestrator};
use crate::source::{ChangeSubscriber, NotificationStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Connecting,
    Watching,
}

/// Snapshot of the watcher for status queries.
#[derive(Debug, Clone)]
pub struct WatcherStatus {
    pub state: WatcherState,
    pub passes_triggered: u64,
    pub notifications_seen: u64,
    pub last_pass: Option<PassReport>,
}

#[derive(Debug, Default)]
struct WatchStats {
    passes_triggered: u64,
    notifications_seen: u64,
    last_pass: Option<PassReport>,
}

struct RunningWatch {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle owning the single background watch task.
///
/// Construct once and hold it where the process is supervised; `start` and
/// `stop` may be called repeatedly.
pub struct ChangeWatcher {
    orchestrator: Arc<SyncOrchestrator>,
    subscriber: Arc<dyn ChangeSubscriber>,
    stop_timeout: Duration,
    state: Arc<watch::Sender<WatcherState>>,
    stats: Arc<StdMutex<WatchStats>>,
    /// Bumped on every start; only the newest loop may publish `Stopped`.
    generation: Arc<AtomicU64>,
    running: Mutex<Option<RunningWatch>>,
}

impl ChangeWatcher {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        subscriber: Arc<dyn ChangeSubscriber>,
        stop_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(WatcherState::Stopped);
        Self {
            orchestrator,
            subscriber,
            stop_timeout,
            state: Arc::new(state),
            stats: Arc::new(StdMutex::new(WatchStats::default())),
            generation: Arc::new(AtomicU64::new(0)),
            running: Mutex::new(None),
        }
    }

    /// Subscribe to the change stream and spawn the watch loop.
    ///
    /// Returns `false` if the subscription cannot be opened. Calling `start`
    /// while the loop is alive is a no-op that returns `true`.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                tracing::info!("Change watcher already running");
                return true;
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(WatcherState::Connecting);
        let stream = match self.subscriber.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to start change watcher: {:#}", e);
                self.state.send_replace(WatcherState::Stopped);
                return false;
            }
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watch_loop(
            Arc::clone(&self.orchestrator),
            stream,
            cancel.clone(),
            LoopHandles {
                state: Arc::clone(&self.state),
                stats: Arc::clone(&self.stats),
                current: Arc::clone(&self.generation),
                generation,
            },
        ));

        *running = Some(RunningWatch { cancel, handle });
        tracing::info!("Change watcher started");
        true
    }

    /// Cancel the watch loop and wait for it, at most `stop_timeout`.
    ///
    /// A loop that does not exit in time is left to finish on its own; the
    /// caller is never blocked past the timeout. If `start` runs again before
    /// it exits, the abandoned loop no longer touches the published state.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        tracing::info!("Stopping change watcher");
        running.cancel.cancel();

        match tokio::time::timeout(self.stop_timeout, running.handle).await {
            Ok(Ok(())) => tracing::info!("Change watcher stopped"),
            Ok(Err(e)) => {
                tracing::error!("Change watcher task ended abnormally: {}", e);
                self.state.send_replace(WatcherState::Stopped);
            }
            Err(_) => tracing::warn!(
                "Change watcher did not stop within {:?}; leaving it to finish in the background",
                self.stop_timeout
            ),
        }
    }

    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> WatcherStatus {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        WatcherStatus {
            state: self.state(),
            passes_triggered: stats.passes_triggered,
            notifications_seen: stats.notifications_seen,
            last_pass: stats.last_pass.clone(),
        }
    }
}

/// Shared state a loop reports into, tagged with the generation it was started as.
struct LoopHandles {
    state: Arc<watch::Sender<WatcherState>>,
    stats: Arc<StdMutex<WatchStats>>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl LoopHandles {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn publish_stopped(&self) {
        self.state.send_if_modified(|state| {
            if !self.is_current() || *state == WatcherState::Stopped {
                return false;
            }
            *state = WatcherState::Stopped;
            true
        });
    }
}

/// Notifications already buffered on the stream.
struct Drained {
    total: u64,
    relevant: u64,
    closed: Option<String>,
}

async fn watch_loop(
    orchestrator: Arc<SyncOrchestrator>,
    mut stream: NotificationStream,
    cancel: CancellationToken,
    handles: LoopHandles,
) {
    let stats = &handles.stats;
    if handles.is_current() {
        handles.state.send_replace(WatcherState::Watching);
    }
    tracing::info!("Watching source for changes");

    'outer: loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Stop requested, leaving change stream");
                break;
            }
            next = stream.next() => next,
        };

        let notification = match next {
            Some(Ok(notification)) => notification,
            Some(Err(e)) => {
                tracing::error!("Change stream failed, watcher stopping: {:#}", e);
                break;
            }
            None => {
                tracing::warn!("Change stream closed, watcher stopping");
                break;
            }
        };

        record(stats, |s| s.notifications_seen += 1);
        let Some(kind) = notification.entity() else {
            tracing::debug!(
                "Ignoring {} on {:?}",
                notification.operation,
                notification.collection
            );
            continue;
        };
        tracing::info!("Change detected: {} on {}", notification.operation, kind);

        // Changes arriving during a pass collapse into one follow-up pass
        loop {
            if cancel.is_cancelled() {
                break 'outer;
            }

            let report = orchestrator.run_pass(&cancel).await;
            record(stats, |s| {
                s.passes_triggered += 1;
                s.last_pass = Some(report);
            });

            let drained = drain_ready(&mut stream);
            record(stats, |s| s.notifications_seen += drained.total);
            if let Some(reason) = drained.closed {
                tracing::warn!("Change stream ended, watcher stopping: {}", reason);
                break 'outer;
            }
            if drained.relevant == 0 {
                break;
            }
            tracing::info!(
                "{} changes arrived during the pass, running one more",
                drained.relevant
            );
        }
    }

    handles.publish_stopped();
}

fn drain_ready(stream: &mut NotificationStream) -> Drained {
    let mut drained = Drained {
        total: 0,
        relevant: 0,
        closed: None,
    };

    while let Some(next) = stream.next().now_or_never() {
        match next {
            Some(Ok(notification)) => {
                drained.total += 1;
                if notification.entity().is_some() {
                    drained.relevant += 1;
                }
            }
            Some(Err(e)) => {
                drained.closed = Some(format!("{:#}", e));
                break;
            }
            None => {
                drained.closed = Some("stream closed".to_string());
                break;
            }
        }
    }

    drained
}

fn record<F>(stats: &StdMutex<WatchStats>, update: F)
where
    F: FnOnce(&mut WatchStats),
{
    let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
    update(&mut stats);
}
