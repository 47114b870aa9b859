//! Cooperative task runner shared by the Producer and the Consumer.
//!
//! `Runner` owns task lifecycle and graceful shutdown; `RunAction` is the
//! single method each side implements. This trades the original
//! inheritance-based base class for composition: a `Runner` is held by
//! value inside each action rather than the action extending it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Something a [`Runner`] can drive to completion: spawn its worker tasks
/// onto the runner. The runner itself, not `run_action`, is responsible for
/// waiting on whatever gets spawned — see [`Runner::run`].
#[async_trait]
pub trait RunAction: Send + Sync {
    async fn run_action(&self, runner: Arc<Runner>);
}

/// Tracks spawned worker tasks, a completed-probe counter, and reacts to
/// SIGINT/SIGTERM by cancelling every tracked task.
pub struct Runner {
    name: String,
    tasks: Mutex<JoinSet<()>>,
    counter: Mutex<u64>,
}

impl Runner {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            tasks: Mutex::new(JoinSet::new()),
            counter: Mutex::new(0),
        })
    }

    /// Spawns `fut` and tracks its handle so shutdown can cancel it.
    pub async fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().await.spawn(fut);
    }

    /// Increments the completed-probe counter. Exposed so workers can
    /// report progress without reaching into `Runner`'s internals.
    pub async fn incr_counter(&self) {
        tracing::debug!("Incrementing counter");
        *self.counter.lock().await += 1;
    }

    pub async fn counter(&self) -> u64 {
        *self.counter.lock().await
    }

    /// Waits for every currently tracked task to finish. Under normal
    /// operation this never returns: workers loop forever until `shutdown`
    /// aborts them. Mirrors the original's `await asyncio.gather(*self._tasks)`
    /// / `queue.join()` wait, which likewise blocks until cancellation.
    pub async fn join_spawned(&self) {
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }

    /// Cancels every tracked task and reaps them. Called from the signal
    /// handler and, for symmetry with normal completion, after `action`
    /// returns on its own.
    async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        tracing::debug!("Stopping {} tasks", tasks.len());
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }

    /// Runs `action` until it (and every task it spawned) completes, or a
    /// shutdown signal arrives, whichever happens first.
    pub async fn run(self: Arc<Self>, action: impl RunAction) {
        tokio::select! {
            _ = async {
                action.run_action(self.clone()).await;
                self.join_spawned().await;
            } => {}
            _ = wait_for_shutdown_signal() => {
                tracing::info!("Stopping {}", self.name);
                self.shutdown().await;
            }
        }
        tracing::info!("{} finished", self.name);
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Retries `op` forever, logging at error level under `label` on every
/// failure, with a delay that doubles each attempt starting at `base` and
/// capping at 8× `base`. Used to wrap Kafka producer/consumer connect calls
/// so transient broker unavailability never crashes the runner; the only
/// way out is the surrounding task being aborted by [`Runner::shutdown`].
pub async fn retry_forever<F, Fut, T, E>(mut op: F, base: Duration, label: &str) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut delay = base;
    let max_delay = base * 8;
    loop {
        match op().await {
            Ok(v) => return v,
            Err(e) => {
                tracing::error!("Failed to start {}: {:?}", label, e);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}
