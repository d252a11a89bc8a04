use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Length prefix: one native-endian `i32`.
pub const HEADER_SIZE: usize = 4;

/// Each element is one native-endian `i32`.
pub const ELEMENT_SIZE: usize = 4;

/// Default maximum sequence length: 16 Mi elements (64 MiB of payload).
pub const DEFAULT_MAX_SEQUENCE_LEN: usize = 16 * 1024 * 1024;

/// Total wire size of a frame carrying `len` elements.
pub fn wire_size(len: usize) -> usize {
    HEADER_SIZE + len * ELEMENT_SIZE
}

/// Append the length prefix for a sequence of `len` elements.
pub fn encode_header(len: usize, dst: &mut BytesMut) -> Result<()> {
    let len_i32 = i32::try_from(len).map_err(|_| FrameError::SequenceTooLong {
        len,
        max: i32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE);
    dst.put_i32_ne(len_i32);
    Ok(())
}

/// Validate a received length prefix and return the element count.
pub fn decode_header(header: [u8; HEADER_SIZE], max_len: usize) -> Result<usize> {
    let raw = i32::from_ne_bytes(header);
    if raw < 0 {
        return Err(FrameError::NegativeLength(raw));
    }
    let len = raw as usize;
    if len > max_len {
        return Err(FrameError::SequenceTooLong { len, max: max_len });
    }
    Ok(len)
}

/// Encode a sequence into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────────────────┐
/// │ Length       │ Elements                      │
/// │ (i32, native)│ (Length × i32, native)        │
/// └──────────────┴──────────────────────────────┘
/// ```
pub fn encode_sequence(seq: &[i32], dst: &mut BytesMut) -> Result<()> {
    encode_header(seq.len(), dst)?;
    dst.reserve(seq.len() * ELEMENT_SIZE);
    for &value in seq {
        dst.put_i32_ne(value);
    }
    Ok(())
}

/// Decode one sequence from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_sequence(src: &mut BytesMut, max_len: usize) -> Result<Option<Vec<i32>>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let len = decode_header(header, max_len)?;

    if src.len() < wire_size(len) {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let mut payload = src.split_to(len * ELEMENT_SIZE);
    let mut seq = Vec::with_capacity(len);
    while payload.has_remaining() {
        seq.push(payload.get_i32_ne());
    }
    Ok(Some(seq))
}

/// Configuration for sequence framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum number of elements in one frame. Default: 16 Mi.
    pub max_sequence_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_sequence_len: DEFAULT_MAX_SEQUENCE_LEN,
        }
    }
}
