//! Shutdown signals shared between the task manager and spawned tasks.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use futures_util::{
    FutureExt,
    future::{FusedFuture, Shared},
};
use tokio::sync::oneshot;

/// Creates a connected [`Signal`] / [`Shutdown`] pair.
pub(crate) fn signal() -> (Signal, Shutdown) {
    let (sender, receiver) = oneshot::channel();
    (Signal(sender), Shutdown(receiver.shared()))
}

/// Fires the shutdown for every clone of the paired [`Shutdown`].
#[derive(Debug)]
pub(crate) struct Signal(oneshot::Sender<()>);

impl Signal {
    /// Fire the signal. Dropping the signal has the same effect.
    pub(crate) fn fire(self) {
        let _ = self.0.send(());
    }
}

/// Future that resolves once the paired [`Signal`] fires or is dropped.
#[derive(Debug, Clone)]
#[must_use = "futures do nothing unless polled"]
pub(crate) struct Shutdown(Shared<oneshot::Receiver<()>>);

impl Future for Shutdown {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.0.is_terminated() || this.0.poll_unpin(cx).is_ready() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Shutdown future handed to tasks spawned with
/// [`TaskExecutor::spawn_with_graceful_shutdown_signal`](crate::TaskExecutor::spawn_with_graceful_shutdown_signal).
///
/// Resolves to a [`GracefulShutdownGuard`]; the manager waits until every guard is dropped.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct GracefulShutdown {
    shutdown: Shutdown,
    guard: Option<GracefulShutdownGuard>,
}

impl GracefulShutdown {
    pub(crate) fn new(shutdown: Shutdown, guard: GracefulShutdownGuard) -> Self {
        Self {
            shutdown,
            guard: Some(guard),
        }
    }
}

impl Future for GracefulShutdown {
    type Output = GracefulShutdownGuard;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.shutdown).poll(cx) {
            Poll::Ready(()) => match this.guard.take() {
                Some(guard) => Poll::Ready(guard),
                None => Poll::Pending,
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Held by a task while it finishes its shutdown work.
#[derive(Debug)]
#[must_use = "dropping the guard signals the task has finished shutting down"]
pub struct GracefulShutdownGuard(Arc<AtomicUsize>);

impl GracefulShutdownGuard {
    pub(crate) fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for GracefulShutdownGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
