use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tidewire_proto::{
    RenderBatch, ServerFrame, encode_batch_into, encode_server_frame, render_batch_writer,
    seal_render_batch,
};
use tokio::sync::mpsc;

use super::pending::{PendingRender, RenderCompletion};
use super::registry::RendererRegistry;
use super::RenderError;
use crate::config::RenderConfig;
use crate::metrics;
use crate::transport::{ClientProxy, TransportError};

enum Outbound {
    Render(Arc<PendingRender>),
    Control(Bytes),
}

pub(crate) struct TransportShared {
    registry_id: u64,
    registry: RendererRegistry,
    config: RenderConfig,
    next_render_id: AtomicU64,
    pending: DashMap<u64, Arc<PendingRender>>,
    // Held while a render id is allocated and queued so frames enter the
    // queue in render-id order. `None` once disposed.
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    queued: AtomicUsize,
    proxy: RwLock<Arc<dyn ClientProxy>>,
    // Control frames that reached the sender while disconnected. Guards the
    // `connected` flip on reconnect so none are stranded.
    held_controls: Mutex<Vec<Bytes>>,
    connected: AtomicBool,
    disposed: AtomicBool,
}

/// Sends render batches to one client and tracks them until the client
/// acknowledges them, they time out, or sending fails.
///
/// Cloning yields another handle to the same transport.
#[derive(Clone)]
pub struct RenderTransport {
    shared: Arc<TransportShared>,
}

impl RenderTransport {
    /// Registers a new transport in `registry` and starts its sender task.
    /// Must be called from within a Tokio runtime.
    pub fn attach(
        registry: &RendererRegistry,
        proxy: Arc<dyn ClientProxy>,
        config: RenderConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = proxy.is_connected();
        let shared = Arc::new_cyclic(|weak| TransportShared {
            registry_id: registry.register(weak.clone()),
            registry: registry.clone(),
            config,
            next_render_id: AtomicU64::new(0),
            pending: DashMap::new(),
            outbound: Mutex::new(Some(tx)),
            queued: AtomicUsize::new(0),
            proxy: RwLock::new(proxy),
            held_controls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(connected),
            disposed: AtomicBool::new(false),
        });
        tokio::spawn(run_sender(Arc::downgrade(&shared), rx));
        tracing::debug!(
            target = "tidewire::render",
            registry_id = shared.registry_id,
            "render transport attached"
        );
        Self { shared }
    }

    pub(super) fn from_shared(shared: Arc<TransportShared>) -> Self {
        Self { shared }
    }

    pub fn registry_id(&self) -> u64 {
        self.shared.registry_id
    }

    pub fn config(&self) -> &RenderConfig {
        &self.shared.config
    }

    /// Highest render id allocated so far; 0 before the first dispatch.
    pub fn last_render_id(&self) -> u64 {
        self.shared.next_render_id.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_pending(&self, render_id: u64) -> bool {
        self.shared.pending.contains_key(&render_id)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Encodes `batch`, assigns it the next render id and queues it for
    /// sending. Returns immediately; the completion reports the outcome.
    ///
    /// Once disposed, nothing is sent and the completion is already
    /// resolved.
    pub fn dispatch_batch(&self, batch: &RenderBatch) -> RenderCompletion {
        let shared = &self.shared;
        if self.is_disposed() {
            tracing::debug!(
                target = "tidewire::render",
                registry_id = shared.registry_id,
                "renderer disposed; batch dropped"
            );
            return RenderCompletion::resolved();
        }

        let mut writer = render_batch_writer();
        encode_batch_into(&mut writer, batch);

        let outbound = shared.outbound.lock();
        let Some(sender) = outbound.as_ref() else {
            return RenderCompletion::resolved();
        };
        let render_id = shared.next_render_id.fetch_add(1, Ordering::AcqRel) + 1;
        let frame = seal_render_batch(writer, shared.registry_id, render_id);
        let frame_len = frame.len();
        let pending = PendingRender::new(render_id, frame, shared.config.render_timeout);
        let completion = pending.completion();

        shared.pending.insert(render_id, Arc::clone(&pending));
        metrics::PENDING_RENDERS.inc();
        spawn_timeout(Arc::downgrade(shared), Arc::clone(&pending), shared.config.render_timeout);
        shared.enqueue(sender, Outbound::Render(pending));
        drop(outbound);

        metrics::RENDERS_DISPATCHED.inc();
        metrics::BATCH_BYTES.observe(frame_len as f64);
        tracing::debug!(
            target = "tidewire::render",
            registry_id = shared.registry_id,
            render_id,
            bytes = frame_len,
            edits = batch.edit_count(),
            "dispatched render batch"
        );
        completion
    }

    /// Settles the pending render named by a client acknowledgment. Returns
    /// `false` when the id is unknown or already settled.
    pub fn on_acknowledge(&self, render_id: u64, error: Option<String>) -> bool {
        let shared = &self.shared;
        let Some((_, pending)) = shared.pending.remove(&render_id) else {
            metrics::UNKNOWN_ACKS.inc();
            tracing::debug!(
                target = "tidewire::render",
                registry_id = shared.registry_id,
                render_id,
                "acknowledgment for unknown or expired render"
            );
            return false;
        };
        metrics::PENDING_RENDERS.dec();

        match error {
            None => {
                if pending.resolve() {
                    metrics::record_completion("ok");
                    tracing::trace!(
                        target = "tidewire::render",
                        registry_id = shared.registry_id,
                        render_id,
                        "render acknowledged"
                    );
                }
            }
            Some(message) => {
                tracing::warn!(
                    target = "tidewire::render",
                    registry_id = shared.registry_id,
                    render_id,
                    error = %message,
                    "client failed to apply render batch"
                );
                let error = RenderError::RemoteApply { render_id, message };
                if pending.fault(error) {
                    metrics::record_completion("remote_error");
                }
            }
        }
        true
    }

    /// Queues a non-render frame behind any batches already queued.
    pub fn send_control(&self, frame: &ServerFrame) -> bool {
        let outbound = self.shared.outbound.lock();
        let Some(sender) = outbound.as_ref() else {
            return false;
        };
        self.shared
            .enqueue(sender, Outbound::Control(encode_server_frame(frame)));
        true
    }

    /// Requeues every unsettled batch in render-id order.
    pub fn send_pending_batches(&self) -> usize {
        let outbound = self.shared.outbound.lock();
        let Some(sender) = outbound.as_ref() else {
            return 0;
        };
        let mut pending: Vec<Arc<PendingRender>> = self
            .shared
            .pending
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|render| !render.is_settled())
            .collect();
        pending.sort_by_key(|render| render.render_id());
        let count = pending.len();
        for render in pending {
            self.shared.enqueue(sender, Outbound::Render(render));
        }
        count
    }

    /// Holds queued batches until [`RenderTransport::reconnect`]; their
    /// timers keep running.
    pub fn disconnect(&self) {
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            tracing::info!(
                target = "tidewire::render",
                registry_id = self.shared.registry_id,
                pending = self.pending_count(),
                "client disconnected"
            );
        }
    }

    /// Switches to a new client connection, sends the control frames held
    /// while disconnected, then resends unacknowledged batches. Returns the
    /// number of batches resent.
    pub fn reconnect(&self, proxy: Arc<dyn ClientProxy>) -> usize {
        *self.shared.proxy.write() = proxy;
        let controls = {
            let mut held = self.shared.held_controls.lock();
            self.shared.connected.store(true, Ordering::Release);
            std::mem::take(&mut *held)
        };
        let flushed = controls.len();
        if let Some(sender) = self.shared.outbound.lock().as_ref() {
            for frame in controls {
                self.shared.enqueue(sender, Outbound::Control(frame));
            }
        }
        let resent = self.send_pending_batches();
        tracing::info!(
            target = "tidewire::render",
            registry_id = self.shared.registry_id,
            flushed,
            resent,
            "client reconnected"
        );
        resent
    }

    /// Deregisters the transport and stops accepting new frames. Frames
    /// already queued are still sent and pending renders settle on their
    /// own.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.registry.deregister(self.shared.registry_id);
        self.shared.outbound.lock().take();
        tracing::debug!(
            target = "tidewire::render",
            registry_id = self.shared.registry_id,
            pending = self.pending_count(),
            "render transport disposed"
        );
    }
}

impl TransportShared {
    fn enqueue(&self, sender: &mpsc::UnboundedSender<Outbound>, item: Outbound) {
        let depth = self.queued.fetch_add(1, Ordering::AcqRel) + 1;
        if depth > self.config.outbound_warn_depth {
            tracing::warn!(
                target = "tidewire::render",
                registry_id = self.registry_id,
                depth,
                "outbound queue backed up"
            );
        }
        if let Err(mpsc::error::SendError(item)) = sender.send(item) {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            if let Outbound::Render(pending) = item {
                let render_id = pending.render_id();
                self.fail_pending(
                    &pending,
                    RenderError::Transport {
                        render_id,
                        source: TransportError::ChannelClosed,
                    },
                );
            }
        }
    }

    async fn deliver(&self, item: Outbound) {
        let item = match item {
            Outbound::Control(frame) => {
                let mut held = self.held_controls.lock();
                if !self.connected.load(Ordering::Acquire) {
                    held.push(frame);
                    tracing::debug!(
                        target = "tidewire::render",
                        registry_id = self.registry_id,
                        held = held.len(),
                        "client disconnected; holding control frame"
                    );
                    return;
                }
                Outbound::Control(frame)
            }
            render => render,
        };
        if !self.connected.load(Ordering::Acquire) {
            if let Outbound::Render(pending) = &item {
                tracing::debug!(
                    target = "tidewire::render",
                    registry_id = self.registry_id,
                    render_id = pending.render_id(),
                    "client disconnected; holding render for resend"
                );
            }
            return;
        }
        let proxy = self.proxy.read().clone();
        match item {
            Outbound::Render(pending) => {
                if pending.is_settled() {
                    return;
                }
                let render_id = pending.render_id();
                if let Err(err) = proxy.send(pending.frame()).await {
                    self.fail_pending(
                        &pending,
                        RenderError::Transport {
                            render_id,
                            source: err,
                        },
                    );
                }
            }
            Outbound::Control(frame) => {
                if let Err(err) = proxy.send(frame).await {
                    tracing::warn!(
                        target = "tidewire::render",
                        registry_id = self.registry_id,
                        error = %err,
                        "failed to send control frame"
                    );
                }
            }
        }
    }

    fn remove_pending(&self, pending: &Arc<PendingRender>) {
        let removed = self
            .pending
            .remove_if(&pending.render_id(), |_, current| Arc::ptr_eq(current, pending));
        if removed.is_some() {
            metrics::PENDING_RENDERS.dec();
        }
    }

    fn fail_pending(&self, pending: &Arc<PendingRender>, error: RenderError) {
        self.remove_pending(pending);
        let outcome = error.outcome();
        let message = error.to_string();
        if pending.fault(error) {
            metrics::record_completion(outcome);
            tracing::warn!(
                target = "tidewire::render",
                registry_id = self.registry_id,
                render_id = pending.render_id(),
                error = %message,
                "render faulted"
            );
        }
    }
}

impl Drop for TransportShared {
    fn drop(&mut self) {
        self.registry.deregister(self.registry_id);
    }
}

async fn run_sender(weak: Weak<TransportShared>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        let Some(shared) = weak.upgrade() else {
            break;
        };
        shared.queued.fetch_sub(1, Ordering::AcqRel);
        shared.deliver(item).await;
    }
}

fn spawn_timeout(weak: Weak<TransportShared>, pending: Arc<PendingRender>, timeout: std::time::Duration) {
    tokio::spawn(async move {
        if tokio::time::timeout_at(pending.deadline(), pending.settled())
            .await
            .is_ok()
        {
            return;
        }
        let error = RenderError::Timeout {
            render_id: pending.render_id(),
            timeout,
        };
        match weak.upgrade() {
            Some(shared) => shared.fail_pending(&pending, error),
            None => {
                pending.fault(error);
            }
        }
    });
}
