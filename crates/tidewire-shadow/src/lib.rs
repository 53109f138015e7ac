//! Client-side mirror of a remotely rendered component tree.
//!
//! [`ShadowTree`] owns the logical nodes, [`apply_batch`] replays a decoded
//! [`tidewire_proto::RenderBatch`] against it and [`RenderClient`] is the
//! receiving endpoint that turns every batch into an acknowledgment.

pub mod applier;
pub mod client;
pub mod error;
pub mod node;
pub mod tree;

pub use applier::{apply_batch, apply_edits};
pub use client::{Acknowledgment, RenderClient};
pub use error::ApplyError;
pub use node::{LogicalNode, NodeId, NodeKind, SnapshotNode};
pub use tree::ShadowTree;
