//! Messages exchanged over the duplex channel.
//!
//! Render batches use a fixed-size envelope (header byte, registry id and
//! render id as little-endian u64) so the server can encode the batch
//! payload first and fill the envelope in place once the render id is
//! known.

use bytes::Bytes;

use crate::batch::ComponentId;
use crate::codec::{
    header_byte, read_header, write_string, write_var_u32, write_var_u64, BatchWriter, Cursor,
    DecodeError,
};

pub const RENDER_BATCH_HEADER_LEN: usize = 1 + 8 + 8;

const SERVER_KIND_RENDER_BATCH: u8 = 1;
const SERVER_KIND_ATTACH_COMPONENT: u8 = 2;
const SERVER_KIND_CIRCUIT_ERROR: u8 = 3;

const CLIENT_KIND_RENDER_COMPLETED: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Encoded [`crate::RenderBatch`] payload for one renderer.
    RenderBatch {
        registry_id: u64,
        render_id: u64,
        batch: Bytes,
    },
    /// Maps a component to the root of the client's tree for `registry_id`.
    AttachComponent {
        registry_id: u64,
        component_id: ComponentId,
    },
    CircuitError {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    RenderCompleted {
        render_id: u64,
        error: Option<String>,
    },
}

/// Writer whose header region fits the render-batch envelope.
pub fn render_batch_writer() -> BatchWriter {
    BatchWriter::with_header(RENDER_BATCH_HEADER_LEN)
}

/// Fills the envelope of a writer produced by [`render_batch_writer`] and
/// hands the buffer off without copying the payload.
pub fn seal_render_batch(mut writer: BatchWriter, registry_id: u64, render_id: u64) -> Bytes {
    if writer.header_len() != RENDER_BATCH_HEADER_LEN {
        let mut buf = Vec::with_capacity(RENDER_BATCH_HEADER_LEN + writer.payload().len());
        write_envelope(&mut buf, registry_id, render_id);
        buf.extend_from_slice(writer.payload());
        return Bytes::from(buf);
    }
    let header = writer.header_mut();
    header[0] = header_byte(SERVER_KIND_RENDER_BATCH);
    header[1..9].copy_from_slice(&registry_id.to_le_bytes());
    header[9..17].copy_from_slice(&render_id.to_le_bytes());
    writer.into_bytes()
}

fn write_envelope(buf: &mut Vec<u8>, registry_id: u64, render_id: u64) {
    buf.push(header_byte(SERVER_KIND_RENDER_BATCH));
    buf.extend_from_slice(&registry_id.to_le_bytes());
    buf.extend_from_slice(&render_id.to_le_bytes());
}

pub fn encode_server_frame(frame: &ServerFrame) -> Bytes {
    let mut buf = Vec::with_capacity(32);
    match frame {
        ServerFrame::RenderBatch {
            registry_id,
            render_id,
            batch,
        } => {
            buf.reserve(batch.len());
            write_envelope(&mut buf, *registry_id, *render_id);
            buf.extend_from_slice(batch);
        }
        ServerFrame::AttachComponent {
            registry_id,
            component_id,
        } => {
            buf.push(header_byte(SERVER_KIND_ATTACH_COMPONENT));
            write_var_u64(&mut buf, *registry_id);
            write_var_u32(&mut buf, *component_id);
        }
        ServerFrame::CircuitError { message } => {
            buf.push(header_byte(SERVER_KIND_CIRCUIT_ERROR));
            write_string(&mut buf, message);
        }
    }
    Bytes::from(buf)
}

pub fn decode_server_frame(bytes: &[u8]) -> Result<ServerFrame, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let kind = read_header(&mut cursor)?;
    let frame = match kind {
        SERVER_KIND_RENDER_BATCH => {
            let registry_id = cursor.read_u64_le()?;
            let render_id = cursor.read_u64_le()?;
            let batch = Bytes::copy_from_slice(cursor.rest());
            return Ok(ServerFrame::RenderBatch {
                registry_id,
                render_id,
                batch,
            });
        }
        SERVER_KIND_ATTACH_COMPONENT => ServerFrame::AttachComponent {
            registry_id: cursor.read_var_u64()?,
            component_id: cursor.read_var_u32()?,
        },
        SERVER_KIND_CIRCUIT_ERROR => ServerFrame::CircuitError {
            message: cursor.read_string()?,
        },
        other => return Err(DecodeError::UnexpectedKind(other)),
    };
    if cursor.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(cursor.remaining()));
    }
    Ok(frame)
}

pub fn encode_client_frame(frame: &ClientFrame) -> Bytes {
    let mut buf = Vec::with_capacity(16);
    match frame {
        ClientFrame::RenderCompleted { render_id, error } => {
            buf.push(header_byte(CLIENT_KIND_RENDER_COMPLETED));
            write_var_u64(&mut buf, *render_id);
            buf.push(error.is_some() as u8);
            if let Some(message) = error {
                write_string(&mut buf, message);
            }
        }
    }
    Bytes::from(buf)
}

pub fn decode_client_frame(bytes: &[u8]) -> Result<ClientFrame, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let frame = match read_header(&mut cursor)? {
        CLIENT_KIND_RENDER_COMPLETED => {
            let render_id = cursor.read_var_u64()?;
            let error = if cursor.read_bool()? {
                Some(cursor.read_string()?)
            } else {
                None
            };
            ClientFrame::RenderCompleted { render_id, error }
        }
        other => return Err(DecodeError::UnexpectedKind(other)),
    };
    if cursor.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(cursor.remaining()));
    }
    Ok(frame)
}
