use std::sync::Arc;

use dashmap::DashMap;
use tidewire_proto::{ClientFrame, DecodeError, decode_client_frame};

use super::{Circuit, CircuitHandler, CircuitId};
use crate::config::RenderConfig;
use crate::render::RendererRegistry;
use crate::transport::ClientProxy;

/// Host-side table of live circuits, used to route client frames to the
/// circuit they belong to.
#[derive(Clone, Default)]
pub struct CircuitRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    circuits: DashMap<CircuitId, Circuit>,
    renderers: RendererRegistry,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn renderers(&self) -> &RendererRegistry {
        &self.inner.renderers
    }

    pub fn create_circuit(
        &self,
        proxy: Arc<dyn ClientProxy>,
        config: RenderConfig,
        handlers: Vec<Arc<dyn CircuitHandler>>,
    ) -> Circuit {
        let circuit = Circuit::create(&self.inner.renderers, proxy, config, handlers);
        self.inner.circuits.insert(circuit.id(), circuit.clone());
        circuit
    }

    pub fn get(&self, id: CircuitId) -> Option<Circuit> {
        self.inner.circuits.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.circuits.is_empty()
    }

    /// Routes an acknowledgment to the circuit's render transport. Returns
    /// `false` for unknown circuits and unknown render ids.
    pub fn acknowledge(&self, id: CircuitId, render_id: u64, error: Option<String>) -> bool {
        match self.get(id) {
            Some(circuit) => circuit.renderer().on_acknowledge(render_id, error),
            None => {
                tracing::debug!(
                    target = "tidewire::circuit",
                    circuit_id = %id,
                    render_id,
                    "acknowledgment for unknown circuit"
                );
                false
            }
        }
    }

    /// Decodes one client frame and routes it to circuit `id`.
    pub fn handle_client_frame(&self, id: CircuitId, bytes: &[u8]) -> Result<bool, DecodeError> {
        match decode_client_frame(bytes)? {
            ClientFrame::RenderCompleted { render_id, error } => {
                Ok(self.acknowledge(id, render_id, error))
            }
        }
    }

    /// Disposes circuit `id` and forgets it.
    pub async fn terminate(&self, id: CircuitId) -> bool {
        let Some((_, circuit)) = self.inner.circuits.remove(&id) else {
            return false;
        };
        circuit.dispose().await;
        true
    }

    /// Forgets circuits that disposed themselves after a fault.
    pub fn prune(&self) -> usize {
        let before = self.inner.circuits.len();
        self.inner.circuits.retain(|_, circuit| !circuit.is_disposed());
        before - self.inner.circuits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback;
    use tidewire_proto::encode_client_frame;

    #[test_timeout::tokio_timeout_test(paused)]
    async fn frames_route_to_the_owning_circuit() {
        let registry = CircuitRegistry::new();
        let (proxy, mut peer) = loopback::loopback();
        let circuit = registry.create_circuit(Arc::new(proxy), RenderConfig::default(), Vec::new());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.renderers().len(), 1);

        let completion = circuit
            .renderer()
            .dispatch_batch(&tidewire_proto::RenderBatch::new());
        peer.recv().await.expect("batch sent");

        let ack = encode_client_frame(&ClientFrame::RenderCompleted {
            render_id: 1,
            error: None,
        });
        assert!(!registry.handle_client_frame(CircuitId::new(), &ack).expect("decodes"));
        assert!(registry.handle_client_frame(circuit.id(), &ack).expect("decodes"));
        assert_eq!(completion.await, Ok(()));
        assert!(registry.handle_client_frame(circuit.id(), &[0xff]).is_err());

        assert!(registry.terminate(circuit.id()).await);
        assert!(!registry.terminate(circuit.id()).await);
        assert!(registry.is_empty());
        assert!(registry.renderers().is_empty());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn prune_forgets_disposed_circuits() {
        let registry = CircuitRegistry::new();
        let (proxy, _peer) = loopback::loopback();
        let circuit = registry.create_circuit(Arc::new(proxy), RenderConfig::default(), Vec::new());
        circuit.dispose().await;
        assert_eq!(registry.prune(), 1);
        assert!(registry.get(circuit.id()).is_none());
    }
}
