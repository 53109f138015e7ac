//! Binary encoding of [`RenderBatch`].
//!
//! A batch payload is a header byte (3-bit version, 5-bit kind) followed by
//! four sections: the reference-frame table, the per-component edit lists,
//! disposed component ids and disposed event-handler ids. Every frame and
//! edit is written as a record (`tag`, varint body length, body) so decoders
//! can skip fields appended by newer encoders.

use bytes::Bytes;

use crate::batch::{RenderBatch, RenderTreeDiff};
use crate::edit::{EditKind, RenderTreeEdit};
use crate::frame::{AttributeValue, FrameKind, ReferenceFrame};
use crate::PROTOCOL_VERSION;

const VERSION_BITS: u8 = 3;
const VERSION_MASK: u8 = 0b1110_0000;
pub(crate) const TYPE_MASK: u8 = 0b0001_1111;

pub(crate) const KIND_BATCH: u8 = 0;

const ATTRIBUTE_VALUE_TEXT: u8 = 0;
const ATTRIBUTE_VALUE_HANDLER: u8 = 1;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),
    #[error("unexpected message kind: {0}")]
    UnexpectedKind(u8),
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),
    #[error("unknown edit type: {0}")]
    UnknownEditType(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error("{0} trailing bytes after batch")]
    TrailingBytes(usize),
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
}

/// Growable output buffer with a caller-reserved header region.
///
/// The first `header_len` bytes are zeroed on creation and left for the
/// caller to fill once the payload is known. Capacity doubles whenever a
/// write would overflow it.
#[derive(Debug)]
pub struct BatchWriter {
    buf: Vec<u8>,
    header_len: usize,
    scratch: Vec<u8>,
}

impl BatchWriter {
    const INITIAL_CAPACITY: usize = 256;

    pub fn new() -> Self {
        Self::with_header(0)
    }

    pub fn with_header(header_len: usize) -> Self {
        let capacity = Self::INITIAL_CAPACITY.max(header_len.next_power_of_two());
        let mut buf = Vec::with_capacity(capacity);
        buf.resize(header_len, 0);
        Self {
            buf,
            header_len,
            scratch: Vec::new(),
        }
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[self.header_len..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() == self.header_len
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    fn ensure(&mut self, additional: usize) {
        let needed = self.buf.len() + additional;
        if needed <= self.buf.capacity() {
            return;
        }
        let mut capacity = self.buf.capacity().max(Self::INITIAL_CAPACITY);
        while capacity < needed {
            capacity *= 2;
        }
        self.buf.reserve_exact(capacity - self.buf.len());
    }

    fn put_u8(&mut self, value: u8) {
        self.ensure(1);
        self.buf.push(value);
    }

    fn put_var_u64(&mut self, value: u64) {
        self.ensure(10);
        write_var_u64(&mut self.buf, value);
    }

    fn put_slice(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    fn put_record(&mut self, tag: u8, body: impl FnOnce(&mut Vec<u8>)) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        body(&mut scratch);
        self.put_u8(tag);
        self.put_var_u64(scratch.len() as u64);
        self.put_slice(&scratch);
        self.scratch = scratch;
    }
}

impl Default for BatchWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn encode_batch(batch: &RenderBatch) -> Vec<u8> {
    let mut writer = BatchWriter::new();
    encode_batch_into(&mut writer, batch);
    writer.into_vec()
}

/// Appends the encoded batch after the writer's reserved header.
pub fn encode_batch_into(writer: &mut BatchWriter, batch: &RenderBatch) {
    writer.put_u8(header_byte(KIND_BATCH));

    writer.put_var_u64(batch.reference_frames.len() as u64);
    for frame in &batch.reference_frames {
        writer.put_record(frame.kind().as_u8(), |body| encode_frame_body(body, frame));
    }

    writer.put_var_u64(batch.updated_components.len() as u64);
    for diff in &batch.updated_components {
        writer.put_var_u64(diff.component_id as u64);
        writer.put_var_u64(diff.edits.len() as u64);
        for edit in &diff.edits {
            writer.put_record(edit.kind().as_u8(), |body| encode_edit_body(body, edit));
        }
    }

    writer.put_var_u64(batch.disposed_component_ids.len() as u64);
    for id in &batch.disposed_component_ids {
        writer.put_var_u64(*id as u64);
    }

    writer.put_var_u64(batch.disposed_event_handler_ids.len() as u64);
    for id in &batch.disposed_event_handler_ids {
        writer.put_var_u64(*id);
    }
}

fn encode_frame_body(buf: &mut Vec<u8>, frame: &ReferenceFrame) {
    match frame {
        ReferenceFrame::Element {
            name,
            subtree_length,
        } => {
            write_string(buf, name);
            write_var_u32(buf, *subtree_length);
        }
        ReferenceFrame::Text { content } | ReferenceFrame::Markup { content } => {
            write_string(buf, content);
        }
        ReferenceFrame::Attribute { name, value } => {
            write_string(buf, name);
            match value {
                AttributeValue::Text(text) => {
                    buf.push(ATTRIBUTE_VALUE_TEXT);
                    write_string(buf, text);
                }
                AttributeValue::EventHandler(id) => {
                    buf.push(ATTRIBUTE_VALUE_HANDLER);
                    write_var_u64(buf, *id);
                }
            }
        }
        ReferenceFrame::Component {
            component_id,
            subtree_length,
        } => {
            write_var_u32(buf, *component_id);
            write_var_u32(buf, *subtree_length);
        }
        ReferenceFrame::Region { subtree_length } => {
            write_var_u32(buf, *subtree_length);
        }
        ReferenceFrame::ElementReferenceCapture { capture_id } => {
            write_string(buf, capture_id);
        }
        ReferenceFrame::ComponentReferenceCapture => {}
    }
}

fn encode_edit_body(buf: &mut Vec<u8>, edit: &RenderTreeEdit) {
    match edit {
        RenderTreeEdit::PrependFrame {
            sibling_index,
            reference_frame_index,
        }
        | RenderTreeEdit::SetAttribute {
            sibling_index,
            reference_frame_index,
        }
        | RenderTreeEdit::UpdateText {
            sibling_index,
            reference_frame_index,
        }
        | RenderTreeEdit::UpdateMarkup {
            sibling_index,
            reference_frame_index,
        } => {
            write_var_u32(buf, *sibling_index);
            write_var_u32(buf, *reference_frame_index);
        }
        RenderTreeEdit::RemoveFrame { sibling_index }
        | RenderTreeEdit::StepIn { sibling_index } => {
            write_var_u32(buf, *sibling_index);
        }
        RenderTreeEdit::RemoveAttribute {
            sibling_index,
            attribute_name,
        } => {
            write_var_u32(buf, *sibling_index);
            write_string(buf, attribute_name);
        }
        RenderTreeEdit::PermutationListEntry {
            sibling_index,
            move_to_sibling_index,
        } => {
            write_var_u32(buf, *sibling_index);
            write_var_u32(buf, *move_to_sibling_index);
        }
        RenderTreeEdit::StepOut | RenderTreeEdit::PermutationListEnd => {}
    }
}

pub fn decode_batch(bytes: &[u8]) -> Result<RenderBatch, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let kind = read_header(&mut cursor)?;
    if kind != KIND_BATCH {
        return Err(DecodeError::UnexpectedKind(kind));
    }

    let frame_count = cursor.read_len()?;
    let mut reference_frames = Vec::with_capacity(frame_count.min(cursor.remaining()));
    for _ in 0..frame_count {
        let (tag, mut body) = cursor.read_record()?;
        let kind = FrameKind::from_u8(tag).ok_or(DecodeError::UnknownFrameType(tag))?;
        reference_frames.push(decode_frame_body(kind, &mut body)?);
    }

    let diff_count = cursor.read_len()?;
    let mut updated_components = Vec::with_capacity(diff_count.min(cursor.remaining()));
    for _ in 0..diff_count {
        let component_id = cursor.read_var_u32()?;
        let edit_count = cursor.read_len()?;
        let mut edits = Vec::with_capacity(edit_count.min(cursor.remaining()));
        for _ in 0..edit_count {
            let (tag, mut body) = cursor.read_record()?;
            let kind = EditKind::from_u8(tag).ok_or(DecodeError::UnknownEditType(tag))?;
            edits.push(decode_edit_body(kind, &mut body)?);
        }
        updated_components.push(RenderTreeDiff {
            component_id,
            edits,
        });
    }

    let disposed_count = cursor.read_len()?;
    let mut disposed_component_ids = Vec::with_capacity(disposed_count.min(cursor.remaining()));
    for _ in 0..disposed_count {
        disposed_component_ids.push(cursor.read_var_u32()?);
    }

    let handler_count = cursor.read_len()?;
    let mut disposed_event_handler_ids = Vec::with_capacity(handler_count.min(cursor.remaining()));
    for _ in 0..handler_count {
        disposed_event_handler_ids.push(cursor.read_var_u64()?);
    }

    if cursor.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(cursor.remaining()));
    }

    Ok(RenderBatch {
        updated_components,
        reference_frames,
        disposed_component_ids,
        disposed_event_handler_ids,
    })
}

fn decode_frame_body(kind: FrameKind, body: &mut Cursor<'_>) -> Result<ReferenceFrame, DecodeError> {
    let frame = match kind {
        FrameKind::Element => ReferenceFrame::Element {
            name: body.read_string()?,
            subtree_length: body.read_var_u32()?,
        },
        FrameKind::Text => ReferenceFrame::Text {
            content: body.read_string()?,
        },
        FrameKind::Markup => ReferenceFrame::Markup {
            content: body.read_string()?,
        },
        FrameKind::Attribute => {
            let name = body.read_string()?;
            let value = match body.read_u8()? {
                ATTRIBUTE_VALUE_TEXT => AttributeValue::Text(body.read_string()?),
                ATTRIBUTE_VALUE_HANDLER => AttributeValue::EventHandler(body.read_var_u64()?),
                _ => return Err(DecodeError::InvalidData("invalid attribute value tag")),
            };
            ReferenceFrame::Attribute { name, value }
        }
        FrameKind::Component => ReferenceFrame::Component {
            component_id: body.read_var_u32()?,
            subtree_length: body.read_var_u32()?,
        },
        FrameKind::Region => ReferenceFrame::Region {
            subtree_length: body.read_var_u32()?,
        },
        FrameKind::ElementReferenceCapture => ReferenceFrame::ElementReferenceCapture {
            capture_id: body.read_string()?,
        },
        FrameKind::ComponentReferenceCapture => ReferenceFrame::ComponentReferenceCapture,
    };
    Ok(frame)
}

fn decode_edit_body(kind: EditKind, body: &mut Cursor<'_>) -> Result<RenderTreeEdit, DecodeError> {
    let edit = match kind {
        EditKind::PrependFrame => RenderTreeEdit::PrependFrame {
            sibling_index: body.read_var_u32()?,
            reference_frame_index: body.read_var_u32()?,
        },
        EditKind::RemoveFrame => RenderTreeEdit::RemoveFrame {
            sibling_index: body.read_var_u32()?,
        },
        EditKind::SetAttribute => RenderTreeEdit::SetAttribute {
            sibling_index: body.read_var_u32()?,
            reference_frame_index: body.read_var_u32()?,
        },
        EditKind::RemoveAttribute => RenderTreeEdit::RemoveAttribute {
            sibling_index: body.read_var_u32()?,
            attribute_name: body.read_string()?,
        },
        EditKind::UpdateText => RenderTreeEdit::UpdateText {
            sibling_index: body.read_var_u32()?,
            reference_frame_index: body.read_var_u32()?,
        },
        EditKind::StepIn => RenderTreeEdit::StepIn {
            sibling_index: body.read_var_u32()?,
        },
        EditKind::StepOut => RenderTreeEdit::StepOut,
        EditKind::UpdateMarkup => RenderTreeEdit::UpdateMarkup {
            sibling_index: body.read_var_u32()?,
            reference_frame_index: body.read_var_u32()?,
        },
        EditKind::PermutationListEntry => RenderTreeEdit::PermutationListEntry {
            sibling_index: body.read_var_u32()?,
            move_to_sibling_index: body.read_var_u32()?,
        },
        EditKind::PermutationListEnd => RenderTreeEdit::PermutationListEnd,
    };
    Ok(edit)
}

pub(crate) fn header_byte(kind: u8) -> u8 {
    let version = PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1);
    (version << 5) | (kind & TYPE_MASK)
}

pub(crate) fn read_header(cursor: &mut Cursor<'_>) -> Result<u8, DecodeError> {
    let byte = cursor.read_u8()?;
    let version = (byte & VERSION_MASK) >> 5;
    if version != (PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1)) {
        return Err(DecodeError::InvalidVersion(version));
    }
    Ok(byte & TYPE_MASK)
}

pub(crate) fn write_var_u32(buf: &mut Vec<u8>, value: u32) {
    write_var_u64(buf, value as u64);
}

pub(crate) fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

pub(crate) fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_var_u64(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

#[derive(Clone, Copy)]
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.bytes.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn read_var_u64(&mut self) -> Result<u64, DecodeError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            // The tenth byte may only carry the top bit of a u64.
            if shift == 63 && byte > 1 {
                return Err(DecodeError::VarIntOverflow);
            }
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(DecodeError::VarIntOverflow)
    }

    pub(crate) fn read_var_u32(&mut self) -> Result<u32, DecodeError> {
        let value = self.read_var_u64()?;
        if value > u32::MAX as u64 {
            return Err(DecodeError::InvalidData("u32 overflow"));
        }
        Ok(value as u32)
    }

    pub(crate) fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidData("invalid boolean")),
        }
    }

    pub(crate) fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_len()?;
        let raw = self.read_bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    fn read_len(&mut self) -> Result<usize, DecodeError> {
        Ok(self.read_var_u32()? as usize)
    }

    fn read_record(&mut self) -> Result<(u8, Cursor<'a>), DecodeError> {
        let tag = self.read_u8()?;
        let len = self.read_len()?;
        let body = self.read_bytes(len)?;
        Ok((tag, Cursor::new(body)))
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }
}
