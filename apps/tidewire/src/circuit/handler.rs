use async_trait::async_trait;

use super::CircuitId;
use crate::render::RenderError;

/// An error no caller was positioned to observe.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CircuitFault {
    #[error("mutation failed: {0}")]
    Mutation(String),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("{hook} handler failed: {message}")]
    Handler { hook: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    /// Keep the circuit running.
    Continue,
    /// Notify the client and dispose the circuit.
    Terminate,
}

/// Observes circuit lifecycle transitions and unhandled faults.
///
/// Hooks run on the circuit's dispatcher, so they are serialized with
/// mutations. Handlers are invoked in ascending [`CircuitHandler::order`].
#[async_trait]
pub trait CircuitHandler: Send + Sync {
    fn order(&self) -> i32 {
        0
    }

    async fn on_circuit_opened(&self, _circuit_id: CircuitId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_connection_up(&self, _circuit_id: CircuitId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_connection_down(&self, _circuit_id: CircuitId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_circuit_closed(&self, _circuit_id: CircuitId) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_unhandled_fault(&self, _circuit_id: CircuitId, _fault: &CircuitFault) -> FaultDisposition {
        FaultDisposition::Terminate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hook {
    Opened,
    ConnectionUp,
    ConnectionDown,
    Closed,
}

impl Hook {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Hook::Opened => "circuit_opened",
            Hook::ConnectionUp => "connection_up",
            Hook::ConnectionDown => "connection_down",
            Hook::Closed => "circuit_closed",
        }
    }

    pub(crate) async fn run(self, handler: &dyn CircuitHandler, id: CircuitId) -> anyhow::Result<()> {
        match self {
            Hook::Opened => handler.on_circuit_opened(id).await,
            Hook::ConnectionUp => handler.on_connection_up(id).await,
            Hook::ConnectionDown => handler.on_connection_down(id).await,
            Hook::Closed => handler.on_circuit_closed(id).await,
        }
    }
}

/// Terminate wins if any handler asks for it; no handlers means terminate.
pub(crate) fn resolve_disposition(
    handlers: &[std::sync::Arc<dyn CircuitHandler>],
    id: CircuitId,
    fault: &CircuitFault,
) -> FaultDisposition {
    if handlers.is_empty() {
        return FaultDisposition::Terminate;
    }
    let mut disposition = FaultDisposition::Continue;
    for handler in handlers {
        if handler.on_unhandled_fault(id, fault) == FaultDisposition::Terminate {
            disposition = FaultDisposition::Terminate;
        }
    }
    disposition
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Lenient;

    #[async_trait]
    impl CircuitHandler for Lenient {
        fn on_unhandled_fault(&self, _: CircuitId, _: &CircuitFault) -> FaultDisposition {
            FaultDisposition::Continue
        }
    }

    struct Silent;

    #[async_trait]
    impl CircuitHandler for Silent {}

    #[test_timeout::timeout]
    fn terminate_is_the_default_and_wins_over_continue() {
        let id = CircuitId::new();
        let fault = CircuitFault::Mutation("boom".into());
        assert_eq!(resolve_disposition(&[], id, &fault), FaultDisposition::Terminate);

        let lenient: Vec<Arc<dyn CircuitHandler>> = vec![Arc::new(Lenient)];
        assert_eq!(resolve_disposition(&lenient, id, &fault), FaultDisposition::Continue);

        let mixed: Vec<Arc<dyn CircuitHandler>> = vec![Arc::new(Lenient), Arc::new(Silent)];
        assert_eq!(resolve_disposition(&mixed, id, &fault), FaultDisposition::Terminate);
    }
}
