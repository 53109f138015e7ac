pub mod loopback;

use async_trait::async_trait;
use bytes::Bytes;

pub use loopback::{ClientDriver, LoopbackPeer, LoopbackProxy, loopback};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("channel closed")]
    ChannelClosed,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Server-side handle for pushing frames to one connected client.
#[async_trait]
pub trait ClientProxy: Send + Sync {
    /// Deliver one complete frame. Ordering and delivery are the channel's
    /// responsibility once this returns `Ok`.
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Whether the underlying connection is currently usable.
    fn is_connected(&self) -> bool {
        true
    }
}
