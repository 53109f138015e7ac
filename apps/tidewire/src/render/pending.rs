use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;

use super::RenderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    Pending,
    Resolved,
    Faulted(RenderError),
}

impl RenderStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, RenderStatus::Pending)
    }
}

/// A dispatched batch awaiting acknowledgment.
///
/// The status leaves `Pending` at most once; whichever of acknowledgment,
/// timeout or send failure gets there first decides the outcome.
pub struct PendingRender {
    render_id: u64,
    frame: Bytes,
    deadline: Instant,
    status: watch::Sender<RenderStatus>,
    settled: Notify,
}

impl PendingRender {
    pub(crate) fn new(render_id: u64, frame: Bytes, timeout: Duration) -> Arc<Self> {
        let (status, _) = watch::channel(RenderStatus::Pending);
        Arc::new(Self {
            render_id,
            frame,
            deadline: Instant::now() + timeout,
            status,
            settled: Notify::new(),
        })
    }

    pub fn render_id(&self) -> u64 {
        self.render_id
    }

    /// Sealed frame bytes, kept for resending after a reconnect.
    pub fn frame(&self) -> Bytes {
        self.frame.clone()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn status(&self) -> RenderStatus {
        self.status.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        !self.status.borrow().is_pending()
    }

    pub fn completion(&self) -> RenderCompletion {
        RenderCompletion {
            status: self.status.subscribe(),
        }
    }

    /// Returns `false` if the render had already settled.
    pub fn resolve(&self) -> bool {
        self.settle(RenderStatus::Resolved)
    }

    /// Returns `false` if the render had already settled.
    pub fn fault(&self, error: RenderError) -> bool {
        self.settle(RenderStatus::Faulted(error))
    }

    fn settle(&self, next: RenderStatus) -> bool {
        let won = self.status.send_if_modified(|current| {
            if current.is_pending() {
                *current = next;
                true
            } else {
                false
            }
        });
        if won {
            self.settled.notify_one();
        }
        won
    }

    /// Completes once the render has settled, even if that happened before
    /// the call.
    pub(crate) async fn settled(&self) {
        self.settled.notified().await;
    }
}

impl std::fmt::Debug for PendingRender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRender")
            .field("render_id", &self.render_id)
            .field("frame_len", &self.frame.len())
            .field("status", &*self.status.borrow())
            .finish()
    }
}

/// Awaitable outcome of one dispatched batch. Cloning yields another
/// observer of the same render.
#[derive(Debug, Clone)]
pub struct RenderCompletion {
    status: watch::Receiver<RenderStatus>,
}

impl RenderCompletion {
    /// A completion that is already resolved, for renders that were never
    /// sent.
    pub fn resolved() -> Self {
        let (_, status) = watch::channel(RenderStatus::Resolved);
        Self { status }
    }

    pub fn status(&self) -> RenderStatus {
        self.status.borrow().clone()
    }

    pub async fn wait(mut self) -> Result<(), RenderError> {
        loop {
            match self.status.borrow_and_update().clone() {
                RenderStatus::Resolved => return Ok(()),
                RenderStatus::Faulted(err) => return Err(err),
                RenderStatus::Pending => {}
            }
            if self.status.changed().await.is_err() {
                return match self.status.borrow().clone() {
                    RenderStatus::Resolved => Ok(()),
                    RenderStatus::Faulted(err) => Err(err),
                    RenderStatus::Pending => Err(RenderError::Abandoned),
                };
            }
        }
    }
}

impl IntoFuture for RenderCompletion {
    type Output = Result<(), RenderError>;
    type IntoFuture = BoxFuture<'static, Result<(), RenderError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
