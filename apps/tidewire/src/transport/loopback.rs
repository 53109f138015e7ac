use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tidewire_proto::encode_client_frame;
use tidewire_shadow::RenderClient;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ClientProxy, TransportError};

/// In-process channel pair standing in for a network connection.
pub fn loopback() -> (LoopbackProxy, LoopbackPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LoopbackProxy { tx }, LoopbackPeer { rx })
}

#[derive(Clone)]
pub struct LoopbackProxy {
    tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl ClientProxy for LoopbackProxy {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

pub struct LoopbackPeer {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl LoopbackPeer {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

/// Feeds frames from a [`LoopbackPeer`] into a [`RenderClient`] and hands
/// each encoded acknowledgment to `reply`.
pub struct ClientDriver {
    client: Arc<Mutex<RenderClient>>,
    task: JoinHandle<()>,
}

impl ClientDriver {
    pub fn spawn<F>(mut peer: LoopbackPeer, ack_delay: Duration, reply: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        let client = Arc::new(Mutex::new(RenderClient::new()));
        let task_client = Arc::clone(&client);
        let task = tokio::spawn(async move {
            while let Some(frame) = peer.recv().await {
                let outcome = task_client.lock().handle_frame(&frame);
                match outcome {
                    Ok(Some(ack)) => {
                        if !ack_delay.is_zero() {
                            tokio::time::sleep(ack_delay).await;
                        }
                        reply(encode_client_frame(&ack));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(
                            target = "tidewire::transport::loopback",
                            error = %err,
                            "dropping undecodable server frame"
                        );
                    }
                }
            }
            tracing::debug!(target = "tidewire::transport::loopback", "loopback peer closed");
        });
        Self { client, task }
    }

    pub fn with_client<R>(&self, f: impl FnOnce(&RenderClient) -> R) -> R {
        f(&self.client.lock())
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ClientDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
