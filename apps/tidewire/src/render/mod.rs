//! Server-side render transport: render-id sequencing, the pending-render
//! table with per-render timeouts, and the ordered outbound queue.

mod error;
mod pending;
mod registry;
mod transport;

pub use error::RenderError;
pub use pending::{PendingRender, RenderCompletion, RenderStatus};
pub use registry::RendererRegistry;
pub use transport::RenderTransport;
