//! Circuits: one per client session. A circuit owns a render transport and
//! a dispatcher that runs the session's work one unit at a time.

mod dispatcher;
mod handler;
mod registry;

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tidewire_proto::{ComponentId, RenderBatch, ServerFrame};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::RenderConfig;
use crate::render::{RenderCompletion, RenderTransport, RendererRegistry};
use crate::transport::ClientProxy;

use dispatcher::{Dispatcher, Mutation, Report, WorkItem};
use handler::{Hook, resolve_disposition};

pub use handler::{CircuitFault, CircuitHandler, FaultDisposition};
pub use registry::CircuitRegistry;

const GENERIC_FAULT_MESSAGE: &str =
    "There was an unhandled exception on the current circuit, so this circuit will be terminated. \
     Set TIDEWIRE_DETAILED_ERRORS=1 for more details.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircuitId(Uuid);

impl CircuitId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CircuitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Created,
    Initialized,
    Active,
    Disposed,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CircuitError {
    #[error("circuit has been disposed")]
    Disposed,
    #[error("circuit is already initialized")]
    AlreadyInitialized,
    #[error("mutation failed: {0}")]
    Mutation(String),
    #[error("mutation was dropped before it ran")]
    Canceled,
}

pub(crate) struct CircuitInner {
    id: CircuitId,
    config: RenderConfig,
    renderer: RenderTransport,
    state: Mutex<CircuitState>,
    dispatcher: Dispatcher,
    handlers: Vec<Arc<dyn CircuitHandler>>,
    faults: mpsc::UnboundedSender<CircuitFault>,
    initialize_requested: AtomicBool,
}

impl CircuitInner {
    fn is_disposed(&self) -> bool {
        *self.state.lock() == CircuitState::Disposed
    }

    fn advance_state(&self) {
        let mut state = self.state.lock();
        *state = match *state {
            CircuitState::Created => CircuitState::Initialized,
            CircuitState::Initialized | CircuitState::Active => CircuitState::Active,
            CircuitState::Disposed => CircuitState::Disposed,
        };
    }

    fn report_fault(&self, fault: CircuitFault) {
        if self.faults.send(fault).is_err() {
            tracing::debug!(
                target = "tidewire::circuit",
                circuit_id = %self.id,
                "fault watcher gone; dropping fault"
            );
        }
    }
}

/// One client session. Cloning yields another handle to the same circuit.
#[derive(Clone)]
pub struct Circuit {
    inner: Arc<CircuitInner>,
}

impl Circuit {
    /// Attaches a render transport for `proxy` and starts the circuit's
    /// dispatcher. Must be called from within a Tokio runtime.
    pub fn create(
        registry: &RendererRegistry,
        proxy: Arc<dyn ClientProxy>,
        config: RenderConfig,
        mut handlers: Vec<Arc<dyn CircuitHandler>>,
    ) -> Self {
        handlers.sort_by_key(|handler| handler.order());
        let renderer = RenderTransport::attach(registry, proxy, config.clone());
        let (dispatcher, work_rx) = Dispatcher::new();
        let (faults, fault_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(CircuitInner {
            id: CircuitId::new(),
            config,
            renderer,
            state: Mutex::new(CircuitState::Created),
            dispatcher,
            handlers,
            faults,
            initialize_requested: AtomicBool::new(false),
        });
        tokio::spawn(dispatcher::run_worker(Arc::downgrade(&inner), work_rx));
        tokio::spawn(watch_faults(Arc::downgrade(&inner), fault_rx));
        tracing::info!(
            target = "tidewire::circuit",
            circuit_id = %inner.id,
            registry_id = inner.renderer.registry_id(),
            "circuit created"
        );
        Self { inner }
    }

    pub fn id(&self) -> CircuitId {
        self.inner.id
    }

    pub fn state(&self) -> CircuitState {
        *self.inner.state.lock()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn renderer(&self) -> &RenderTransport {
        &self.inner.renderer
    }

    pub fn config(&self) -> &RenderConfig {
        &self.inner.config
    }

    /// Queues `work` on the dispatcher. Failures are routed to the fault
    /// hook.
    pub fn enqueue_mutation<F, Fut>(&self, work: F) -> Result<(), CircuitError>
    where
        F: FnOnce(CircuitContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit(boxed(work), Report::Fault)
    }

    /// Queues `work` and returns a handle resolving to its result. Failures
    /// go to the handle, not the fault hook.
    pub fn invoke<F, Fut>(&self, work: F) -> MutationHandle
    where
        F: FnOnce(CircuitContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let state = match self.submit(boxed(work), Report::Caller(tx)) {
            Ok(()) => HandleState::Waiting(rx),
            Err(err) => HandleState::Failed(err),
        };
        MutationHandle { state }
    }

    fn submit(&self, mutation: Mutation, report: Report) -> Result<(), CircuitError> {
        if self.is_disposed() {
            return Err(CircuitError::Disposed);
        }
        self.inner.dispatcher.submit(WorkItem { mutation, report })
    }

    /// Runs the opened and connection-up handlers on the dispatcher.
    pub async fn initialize(&self) -> Result<(), CircuitError> {
        if self.inner.initialize_requested.swap(true, Ordering::AcqRel) {
            return Err(CircuitError::AlreadyInitialized);
        }
        self.invoke(|ctx| async move {
            ctx.circuit.run_hook(Hook::Opened).await?;
            ctx.circuit.run_hook(Hook::ConnectionUp).await
        })
        .await
    }

    /// Stops sending to the client and runs connection-down handlers.
    pub fn disconnect(&self) -> Result<(), CircuitError> {
        if self.is_disposed() {
            return Err(CircuitError::Disposed);
        }
        self.inner.renderer.disconnect();
        self.enqueue_mutation(|ctx| async move { ctx.circuit.run_hook(Hook::ConnectionDown).await })
    }

    /// Swaps in a new client connection, resends every unacknowledged batch
    /// and runs connection-up handlers.
    pub fn reconnect(&self, proxy: Arc<dyn ClientProxy>) -> Result<usize, CircuitError> {
        if self.is_disposed() {
            return Err(CircuitError::Disposed);
        }
        let resent = self.inner.renderer.reconnect(proxy);
        self.enqueue_mutation(|ctx| async move { ctx.circuit.run_hook(Hook::ConnectionUp).await })?;
        Ok(resent)
    }

    /// Tells the client to host `component_id` at its tree root.
    pub fn attach_root_component(&self, component_id: ComponentId) -> Result<(), CircuitError> {
        if self.is_disposed() {
            return Err(CircuitError::Disposed);
        }
        let frame = ServerFrame::AttachComponent {
            registry_id: self.inner.renderer.registry_id(),
            component_id,
        };
        if self.inner.renderer.send_control(&frame) {
            Ok(())
        } else {
            Err(CircuitError::Disposed)
        }
    }

    /// Disposes the circuit. Safe to call more than once; only the first
    /// call does anything.
    ///
    /// Queued units that have not started are dropped. The connection-down
    /// and closed handlers run once the unit in flight has finished, or
    /// straight away when called from inside a unit of this circuit.
    pub async fn dispose(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == CircuitState::Disposed {
                return;
            }
            *state = CircuitState::Disposed;
        }
        self.inner.dispatcher.close();
        self.inner.renderer.dispose();

        let _idle = if dispatcher::in_unit(self.inner.id) {
            None
        } else {
            Some(self.inner.dispatcher.wait_idle().await)
        };
        for hook in [Hook::ConnectionDown, Hook::Closed] {
            if let Err(err) = self.run_hook(hook).await {
                tracing::warn!(
                    target = "tidewire::circuit",
                    circuit_id = %self.inner.id,
                    error = %err,
                    "lifecycle handler failed during dispose"
                );
            }
        }
        tracing::info!(
            target = "tidewire::circuit",
            circuit_id = %self.inner.id,
            "circuit disposed"
        );
    }

    async fn run_hook(&self, hook: Hook) -> anyhow::Result<()> {
        for handler in &self.inner.handlers {
            if let Err(err) = hook.run(handler.as_ref(), self.inner.id).await {
                return Err(anyhow::Error::new(CircuitFault::Handler {
                    hook: hook.name(),
                    message: format!("{err:#}"),
                }));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circuit")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("registry_id", &self.inner.renderer.registry_id())
            .finish()
    }
}

fn boxed<F, Fut>(work: F) -> Mutation
where
    F: FnOnce(CircuitContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |ctx| work(ctx).boxed())
}

async fn watch_faults(
    weak: std::sync::Weak<CircuitInner>,
    mut faults: mpsc::UnboundedReceiver<CircuitFault>,
) {
    while let Some(fault) = faults.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if inner.is_disposed() {
            continue;
        }
        let disposition = resolve_disposition(&inner.handlers, inner.id, &fault);
        tracing::error!(
            target = "tidewire::circuit",
            circuit_id = %inner.id,
            error = %fault,
            ?disposition,
            "unhandled circuit fault"
        );
        if disposition == FaultDisposition::Terminate {
            let message = if inner.config.detailed_errors {
                fault.to_string()
            } else {
                GENERIC_FAULT_MESSAGE.to_string()
            };
            inner
                .renderer
                .send_control(&ServerFrame::CircuitError { message });
            Circuit { inner }.dispose().await;
        }
    }
}

/// Passed to every unit run on a circuit's dispatcher.
#[derive(Clone)]
pub struct CircuitContext {
    circuit: Circuit,
}

impl CircuitContext {
    pub(crate) fn new(circuit: Circuit) -> Self {
        Self { circuit }
    }

    pub fn circuit_id(&self) -> CircuitId {
        self.circuit.id()
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn renderer(&self) -> &RenderTransport {
        self.circuit.renderer()
    }

    /// Sends `batch` and returns its completion; the caller observes the
    /// outcome.
    pub fn dispatch_batch(&self, batch: &RenderBatch) -> RenderCompletion {
        self.circuit.renderer().dispatch_batch(batch)
    }

    /// Sends `batch` and routes a failed completion to the fault hook.
    pub fn render(&self, batch: &RenderBatch) {
        let completion = self.dispatch_batch(batch);
        let weak = Arc::downgrade(&self.circuit.inner);
        tokio::spawn(async move {
            if let Err(err) = completion.await {
                if let Some(inner) = weak.upgrade() {
                    inner.report_fault(CircuitFault::Render(err));
                }
            }
        });
    }

    /// Queues a child unit behind everything already queued.
    pub fn enqueue_mutation<F, Fut>(&self, work: F) -> Result<(), CircuitError>
    where
        F: FnOnce(CircuitContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.circuit.enqueue_mutation(work)
    }

    pub fn attach_root_component(&self, component_id: ComponentId) -> Result<(), CircuitError> {
        self.circuit.attach_root_component(component_id)
    }
}

enum HandleState {
    Waiting(oneshot::Receiver<Result<(), CircuitError>>),
    Failed(CircuitError),
}

/// Result of a unit queued with [`Circuit::invoke`].
pub struct MutationHandle {
    state: HandleState,
}

impl MutationHandle {
    pub async fn wait(self) -> Result<(), CircuitError> {
        match self.state {
            HandleState::Failed(err) => Err(err),
            HandleState::Waiting(rx) => rx.await.unwrap_or(Err(CircuitError::Canceled)),
        }
    }
}

impl IntoFuture for MutationHandle {
    type Output = Result<(), CircuitError>;
    type IntoFuture = BoxFuture<'static, Result<(), CircuitError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn circuit_with(handlers: Vec<Arc<dyn CircuitHandler>>) -> (Circuit, loopback::LoopbackPeer) {
        let (proxy, peer) = loopback::loopback();
        let circuit = Circuit::create(
            &RendererRegistry::new(),
            Arc::new(proxy),
            RenderConfig::default(),
            handlers,
        );
        (circuit, peer)
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn units_run_one_at_a_time_in_queue_order() {
        let (circuit, _peer) = circuit_with(Vec::new());
        let running = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let running = Arc::clone(&running);
            let order = Arc::clone(&order);
            circuit
                .enqueue_mutation(move |_| async move {
                    assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    order.lock().push(i);
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .expect("queued");
        }
        circuit.invoke(|_| async { Ok(()) }).await.expect("barrier");
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(circuit.state(), CircuitState::Active);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn state_moves_from_created_through_initialized() {
        let (circuit, _peer) = circuit_with(Vec::new());
        assert_eq!(circuit.state(), CircuitState::Created);
        circuit.invoke(|_| async { Ok(()) }).await.expect("first");
        assert_eq!(circuit.state(), CircuitState::Initialized);
        circuit.invoke(|_| async { Ok(()) }).await.expect("second");
        assert_eq!(circuit.state(), CircuitState::Active);
        circuit.dispose().await;
        assert_eq!(circuit.state(), CircuitState::Disposed);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn invoke_reports_errors_and_panics_to_the_caller() {
        let (circuit, _peer) = circuit_with(Vec::new());
        let err = circuit
            .invoke(|_| async { Err(anyhow::anyhow!("bad input")) })
            .await
            .expect_err("error surfaces");
        assert_eq!(err, CircuitError::Mutation("bad input".into()));

        let err = circuit
            .invoke(|_| async { panic!("kaboom") })
            .await
            .expect_err("panic surfaces");
        assert_eq!(err, CircuitError::Mutation("panicked: kaboom".into()));

        // Caller-observed failures never reach the fault hook.
        circuit.invoke(|_| async { Ok(()) }).await.expect("still alive");
        assert!(!circuit.is_disposed());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn queued_units_are_dropped_on_dispose() {
        let (circuit, _peer) = circuit_with(Vec::new());
        let started = Arc::new(tokio::sync::Notify::new());
        let gate = Arc::new(tokio::sync::Notify::new());
        let ran = Arc::new(AtomicBool::new(false));

        let (signal, wait_gate) = (Arc::clone(&started), Arc::clone(&gate));
        let first = circuit.invoke(move |_| async move {
            signal.notify_one();
            wait_gate.notified().await;
            Ok(())
        });
        let flag = Arc::clone(&ran);
        let second = circuit.invoke(move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        started.notified().await;

        let disposing = tokio::spawn({
            let circuit = circuit.clone();
            async move { circuit.dispose().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(circuit.is_disposed());
        gate.notify_one();
        disposing.await.expect("dispose finished");
        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Err(CircuitError::Canceled));
        assert!(!ran.load(Ordering::SeqCst));
    }

    struct Journal(Arc<Mutex<Vec<&'static str>>>);

    #[async_trait::async_trait]
    impl CircuitHandler for Journal {
        async fn on_connection_down(&self, _: CircuitId) -> anyhow::Result<()> {
            self.0.lock().push("down");
            Ok(())
        }

        async fn on_circuit_closed(&self, _: CircuitId) -> anyhow::Result<()> {
            self.0.lock().push("closed");
            Ok(())
        }
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn close_handlers_wait_for_the_running_unit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (circuit, _peer) = circuit_with(vec![Arc::new(Journal(Arc::clone(&log)))]);
        let started = Arc::new(tokio::sync::Notify::new());
        let gate = Arc::new(tokio::sync::Notify::new());

        let (signal, wait_gate, unit_log) =
            (Arc::clone(&started), Arc::clone(&gate), Arc::clone(&log));
        let unit = circuit.invoke(move |_| async move {
            signal.notify_one();
            wait_gate.notified().await;
            unit_log.lock().push("unit");
            Ok(())
        });
        started.notified().await;

        let disposing = tokio::spawn({
            let circuit = circuit.clone();
            async move { circuit.dispose().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(circuit.is_disposed());
        assert!(log.lock().is_empty());
        assert!(!disposing.is_finished());

        gate.notify_one();
        disposing.await.expect("dispose finished");
        assert_eq!(unit.await, Ok(()));
        assert_eq!(*log.lock(), vec!["unit", "down", "closed"]);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn unit_can_dispose_its_own_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (circuit, _peer) = circuit_with(vec![Arc::new(Journal(Arc::clone(&log)))]);

        let result = circuit
            .invoke(|ctx| async move {
                ctx.circuit().dispose().await;
                Ok(())
            })
            .await;
        assert_eq!(result, Ok(()));
        assert!(circuit.is_disposed());
        assert_eq!(*log.lock(), vec!["down", "closed"]);
    }
}
