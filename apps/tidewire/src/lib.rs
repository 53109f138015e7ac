//! Server side of the render-tree sync protocol: render transport with
//! acknowledgment tracking, and circuits that serialize work per session.

pub mod circuit;
pub mod config;
pub mod metrics;
pub mod render;
pub mod telemetry;
pub mod transport;

pub use circuit::{
    Circuit, CircuitContext, CircuitError, CircuitFault, CircuitHandler, CircuitId,
    CircuitRegistry, CircuitState, FaultDisposition, MutationHandle,
};
pub use config::RenderConfig;
pub use render::{RenderCompletion, RenderError, RenderStatus, RenderTransport, RendererRegistry};
pub use transport::{ClientProxy, TransportError};
