use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::transport::{RenderTransport, TransportShared};

/// Process-wide map from registry id to live render transports.
///
/// Entries are weak; a transport that is dropped without being disposed
/// simply stops resolving.
#[derive(Clone, Default)]
pub struct RendererRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    renderers: DashMap<u64, Weak<TransportShared>>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn register(&self, renderer: Weak<TransportShared>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.renderers.insert(id, renderer);
        id
    }

    pub fn find(&self, registry_id: u64) -> Option<RenderTransport> {
        self.inner
            .renderers
            .get(&registry_id)
            .and_then(|entry| entry.value().upgrade())
            .map(RenderTransport::from_shared)
    }

    pub fn deregister(&self, registry_id: u64) -> bool {
        self.inner.renderers.remove(&registry_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.renderers.is_empty()
    }
}
