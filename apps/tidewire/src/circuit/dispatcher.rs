use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::{Circuit, CircuitContext, CircuitError, CircuitFault, CircuitId, CircuitInner};

tokio::task_local! {
    static CURRENT_UNIT: CircuitId;
}

pub(crate) type Mutation =
    Box<dyn FnOnce(CircuitContext) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

pub(crate) enum Report {
    /// Failures go to the fault hook.
    Fault,
    /// Failures go back to the caller holding the handle.
    Caller(oneshot::Sender<Result<(), CircuitError>>),
}

pub(crate) struct WorkItem {
    pub(crate) mutation: Mutation,
    pub(crate) report: Report,
}

/// Single-consumer queue of units for one circuit.
pub(crate) struct Dispatcher {
    tx: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    // Held by the worker for the whole of each unit.
    running: tokio::sync::Mutex<()>,
}

impl Dispatcher {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<WorkItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
                running: tokio::sync::Mutex::new(()),
            },
            rx,
        )
    }

    pub(crate) fn submit(&self, item: WorkItem) -> Result<(), CircuitError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(CircuitError::Disposed)?;
        tx.send(item).map_err(|_| CircuitError::Disposed)
    }

    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }

    /// Waits for the unit in flight, if any, and keeps the next one from
    /// starting while the guard lives.
    pub(crate) async fn wait_idle(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.running.lock().await
    }
}

/// Whether the caller is running inside a unit of circuit `id`.
pub(crate) fn in_unit(id: CircuitId) -> bool {
    CURRENT_UNIT.try_with(|current| *current == id).unwrap_or(false)
}

/// Runs queued units one at a time until the circuit is disposed or
/// dropped. Units still queued at that point are dropped unrun.
pub(crate) async fn run_worker(weak: Weak<CircuitInner>, mut rx: mpsc::UnboundedReceiver<WorkItem>) {
    while let Some(item) = rx.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let running = inner.dispatcher.wait_idle().await;
        if inner.is_disposed() {
            break;
        }
        inner.advance_state();
        let circuit_id = inner.id;
        let context = CircuitContext::new(Circuit {
            inner: Arc::clone(&inner),
        });

        let outcome = AssertUnwindSafe(CURRENT_UNIT.scope(circuit_id, (item.mutation)(context)))
            .catch_unwind()
            .await;
        drop(running);
        drop(inner);
        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("{err:#}")),
            Err(panic) => Err(panic_message(panic.as_ref())),
        };

        match item.report {
            Report::Caller(reply) => {
                let _ = reply.send(result.map_err(CircuitError::Mutation));
            }
            Report::Fault => {
                if let Err(message) = result {
                    tracing::warn!(
                        target = "tidewire::circuit",
                        circuit_id = %circuit_id,
                        error = %message,
                        "mutation failed"
                    );
                    if let Some(inner) = weak.upgrade() {
                        inner.report_fault(CircuitFault::Mutation(message));
                    }
                }
            }
        }
    }
    tracing::debug!(target = "tidewire::circuit", "dispatcher stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
