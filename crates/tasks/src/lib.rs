//! Task management for the sentry.
//!
//! [`TaskManager`] owns the shutdown signal and watches critical tasks. [`TaskExecutor`] is the
//! cloneable spawning handle given to components: every spawned future runs with panic isolation,
//! so a single misbehaving task is logged and counted instead of taking the process down.
//!
//! - Critical tasks report their panic to the manager, which resolves with a
//!   [`PanickedTaskError`]. They are dropped when shutdown fires.
//! - Graceful tasks are handed a [`GracefulShutdown`] future and finish their own shutdown work;
//!   [`TaskManager::graceful_shutdown_with_timeout`] waits for them.

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    pin::{Pin, pin},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use futures_util::{
    FutureExt,
    future::{Either, select},
};
use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{debug, error};

pub mod metrics;
mod shutdown;

use crate::metrics::{TaskExecutorMetrics, TaskKind};
use shutdown::{Shutdown, Signal, signal};
pub use shutdown::{GracefulShutdown, GracefulShutdownGuard};

/// Error returned by the [`TaskManager`] future when a critical task panicked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("critical task `{task_name}` panicked: `{error:?}`")]
pub struct PanickedTaskError {
    task_name: &'static str,
    error: Option<String>,
}

impl PanickedTaskError {
    fn new(task_name: &'static str, payload: &(dyn Any + Send)) -> Self {
        Self {
            task_name,
            error: panic_message(payload),
        }
    }

    /// Name of the critical task that panicked.
    pub fn task_name(&self) -> &'static str {
        self.task_name
    }

    /// Panic message, if the payload was a string.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(message) = payload.downcast_ref::<&str>() {
        Some((*message).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

/// Owns the shutdown signal and collects panics from critical tasks.
///
/// Poll the manager (it is a future) to learn about critical task failures.
#[derive(Debug)]
#[must_use = "TaskManager must be polled to monitor critical tasks"]
pub struct TaskManager {
    handle: Handle,
    panicked_tasks_tx: UnboundedSender<PanickedTaskError>,
    panicked_tasks_rx: UnboundedReceiver<PanickedTaskError>,
    signal: Option<Signal>,
    on_shutdown: Shutdown,
    graceful_tasks: Arc<AtomicUsize>,
}

impl TaskManager {
    /// Create a manager bound to the runtime of the current context.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Create a manager that spawns onto the given runtime handle.
    pub fn new(handle: Handle) -> Self {
        let (panicked_tasks_tx, panicked_tasks_rx) = unbounded_channel();
        let (signal, on_shutdown) = signal();
        Self {
            handle,
            panicked_tasks_tx,
            panicked_tasks_rx,
            signal: Some(signal),
            on_shutdown,
            graceful_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns a new executor that spawns onto this manager's runtime.
    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor {
            handle: self.handle.clone(),
            on_shutdown: self.on_shutdown.clone(),
            panicked_tasks_tx: self.panicked_tasks_tx.clone(),
            metrics: TaskExecutorMetrics::default(),
            graceful_tasks: Arc::clone(&self.graceful_tasks),
        }
    }

    /// Fire the shutdown signal. Critical tasks are dropped at their next await point.
    pub fn fire_shutdown_signal(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.fire();
        }
    }

    /// Fire the shutdown signal and wait for graceful tasks to release their guards.
    ///
    /// Returns `true` if every graceful task finished before the timeout.
    pub async fn graceful_shutdown_with_timeout(mut self, timeout: Duration) -> bool {
        self.fire_shutdown_signal();
        let deadline = tokio::time::Instant::now() + timeout;
        while self.graceful_tasks.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                debug!(
                    remaining = self.graceful_tasks.load(Ordering::SeqCst),
                    "graceful shutdown timed out"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        debug!("gracefully shut down");
        true
    }
}

impl Future for TaskManager {
    type Output = Result<(), PanickedTaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut().panicked_tasks_rx.poll_recv(cx) {
            Poll::Ready(Some(err)) => Poll::Ready(Err(err)),
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cloneable handle for spawning supervised tasks.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    handle: Handle,
    on_shutdown: Shutdown,
    panicked_tasks_tx: UnboundedSender<PanickedTaskError>,
    metrics: TaskExecutorMetrics,
    graceful_tasks: Arc<AtomicUsize>,
}

impl TaskExecutor {
    /// Spawn a task whose panic should bring the node down.
    ///
    /// The panic is caught, logged, and reported to the [`TaskManager`].
    pub fn spawn_critical<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let finished = self.metrics.track(TaskKind::Critical);
        let on_shutdown = self.on_shutdown.clone();
        let panicked_tasks_tx = self.panicked_tasks_tx.clone();
        let metrics = self.metrics.clone();

        let task = async move {
            let _finished = finished;
            let fut = pin!(AssertUnwindSafe(fut).catch_unwind());
            if let Either::Left((Err(payload), _)) = select(fut, on_shutdown).await {
                metrics.inc_panicked(TaskKind::Critical);
                let err = PanickedTaskError::new(name, &*payload);
                error!(task = name, error = ?err.error(), "critical task panicked");
                let _ = panicked_tasks_tx.send(err);
            }
        };

        self.handle.spawn(task)
    }

    /// Spawn a task that is told about shutdown and may finish its work before exiting.
    ///
    /// The task receives a [`GracefulShutdown`] future; the manager's graceful shutdown waits
    /// until the resolved guard is dropped.
    pub fn spawn_with_graceful_shutdown_signal<F>(
        &self,
        f: impl FnOnce(GracefulShutdown) -> F,
    ) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let finished = self.metrics.track(TaskKind::Graceful);
        let shutdown = GracefulShutdown::new(
            self.on_shutdown.clone(),
            GracefulShutdownGuard::new(Arc::clone(&self.graceful_tasks)),
        );
        let fut = f(shutdown);
        let metrics = self.metrics.clone();

        self.handle.spawn(async move {
            let _finished = finished;
            if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
                metrics.inc_panicked(TaskKind::Graceful);
                error!(error = ?panic_message(&*payload), "task panicked");
            }
        })
    }
}
