//! Render-tree data model and binary wire format shared by the server and
//! the thin client.

pub mod batch;
pub mod codec;
pub mod edit;
pub mod frame;
pub mod wire;

pub use batch::{ComponentId, EventHandlerId, RenderBatch, RenderTreeDiff};
pub use codec::{decode_batch, encode_batch, encode_batch_into, BatchWriter, DecodeError};
pub use edit::{EditKind, RenderTreeEdit};
pub use frame::{AttributeValue, FrameKind, ReferenceFrame};
pub use wire::{
    decode_client_frame, decode_server_frame, encode_client_frame, encode_server_frame,
    render_batch_writer, seal_render_batch, ClientFrame, ServerFrame, RENDER_BATCH_HEADER_LEN,
};

/// Protocol version carried in the top bits of every header byte.
pub const PROTOCOL_VERSION: u8 = 1;
