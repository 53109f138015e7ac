use std::time::Duration;

use crate::transport::TransportError;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("render {render_id} was not acknowledged within {timeout:?}")]
    Timeout { render_id: u64, timeout: Duration },
    #[error("client failed to apply render {render_id}: {message}")]
    RemoteApply { render_id: u64, message: String },
    #[error("failed to send render {render_id}: {source}")]
    Transport {
        render_id: u64,
        #[source]
        source: TransportError,
    },
    #[error("render was abandoned before it settled")]
    Abandoned,
}

impl RenderError {
    /// Metric label for this failure.
    pub fn outcome(&self) -> &'static str {
        match self {
            RenderError::Timeout { .. } => "timeout",
            RenderError::RemoteApply { .. } => "remote_error",
            RenderError::Transport { .. } => "transport_error",
            RenderError::Abandoned => "abandoned",
        }
    }
}
