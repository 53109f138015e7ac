use std::collections::{HashMap, VecDeque};

use tidewire_proto::{decode_batch, decode_server_frame, ClientFrame, DecodeError, ServerFrame};

use crate::applier::apply_batch;
use crate::tree::ShadowTree;

/// Result of processing one render batch, sent back to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    pub render_id: u64,
    pub error: Option<String>,
}

impl Acknowledgment {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_frame(self) -> ClientFrame {
        ClientFrame::RenderCompleted {
            render_id: self.render_id,
            error: self.error,
        }
    }
}

/// Failed acknowledgments remembered per renderer so a resend of a failed
/// batch is answered with the same error.
const RECENT_FAILURES: usize = 64;

#[derive(Debug, Default)]
struct RendererState {
    tree: ShadowTree,
    last_ack: Option<Acknowledgment>,
    recent_failures: VecDeque<Acknowledgment>,
}

impl RendererState {
    fn remember(&mut self, ack: &Acknowledgment) {
        self.last_ack = Some(ack.clone());
        if ack.is_ok() {
            return;
        }
        if self.recent_failures.len() == RECENT_FAILURES {
            self.recent_failures.pop_front();
        }
        self.recent_failures.push_back(ack.clone());
    }
}

/// Receiving end of the render channel: one shadow tree per server-side
/// renderer, keyed by registry id.
#[derive(Debug, Default)]
pub struct RenderClient {
    renderers: HashMap<u64, RendererState>,
    circuit_error: Option<String>,
}

impl RenderClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self, registry_id: u64) -> Option<&ShadowTree> {
        self.renderers.get(&registry_id).map(|state| &state.tree)
    }

    pub fn tree_mut(&mut self, registry_id: u64) -> &mut ShadowTree {
        &mut self.renderers.entry(registry_id).or_default().tree
    }

    /// Last error message the server pushed before terminating the circuit.
    pub fn circuit_error(&self) -> Option<&str> {
        self.circuit_error.as_deref()
    }

    /// Decodes and applies one batch. Failures never escape: they become the
    /// acknowledgment's error message.
    ///
    /// A render id at or below the last one processed is a resend after a
    /// reconnect; it is acknowledged again without being reapplied. Older
    /// resends repeat their original error if it is among the most recent
    /// failures, and are otherwise acknowledged as applied.
    pub fn receive_batch(&mut self, registry_id: u64, render_id: u64, payload: &[u8]) -> Acknowledgment {
        let state = self.renderers.entry(registry_id).or_default();
        if let Some(last) = &state.last_ack {
            if render_id == last.render_id {
                return last.clone();
            }
            if render_id < last.render_id {
                tracing::debug!(
                    target = "tidewire::client",
                    registry_id,
                    render_id,
                    last = last.render_id,
                    "acknowledging already processed batch"
                );
                return state
                    .recent_failures
                    .iter()
                    .find(|failed| failed.render_id == render_id)
                    .cloned()
                    .unwrap_or(Acknowledgment {
                        render_id,
                        error: None,
                    });
            }
        }

        let error = match decode_batch(payload) {
            Ok(batch) => match apply_batch(&mut state.tree, &batch) {
                Ok(()) => None,
                Err(err) => {
                    tracing::warn!(
                        target = "tidewire::client",
                        registry_id,
                        render_id,
                        error = %err,
                        "failed to apply render batch"
                    );
                    Some(err.to_string())
                }
            },
            Err(err) => {
                tracing::warn!(
                    target = "tidewire::client",
                    registry_id,
                    render_id,
                    error = %err,
                    "failed to decode render batch"
                );
                Some(format!("malformed render batch: {err}"))
            }
        };
        let ack = Acknowledgment { render_id, error };
        state.remember(&ack);
        ack
    }

    /// Handles one raw server frame and returns the reply to send, if any.
    pub fn handle_frame(&mut self, bytes: &[u8]) -> Result<Option<ClientFrame>, DecodeError> {
        match decode_server_frame(bytes)? {
            ServerFrame::RenderBatch {
                registry_id,
                render_id,
                batch,
            } => Ok(Some(
                self.receive_batch(registry_id, render_id, &batch)
                    .into_frame(),
            )),
            ServerFrame::AttachComponent {
                registry_id,
                component_id,
            } => {
                self.tree_mut(registry_id)
                    .attach_root_component(component_id);
                Ok(None)
            }
            ServerFrame::CircuitError { message } => {
                tracing::error!(target = "tidewire::client", reason = %message, "circuit terminated by server");
                self.circuit_error = Some(message);
                Ok(None)
            }
        }
    }
}
