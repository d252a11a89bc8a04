//! Length-prefixed integer sequence framing.
//!
//! Every sequence travels as one frame:
//! - a 4-byte native-endian `i32` element count
//! - exactly that many native-endian `i32` elements
//!
//! A count of zero is a valid empty sequence. End-of-stream is only clean at a
//! frame boundary; anything cut short inside a frame is a framing error.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_header, decode_sequence, encode_header, encode_sequence, wire_size, FrameConfig,
    DEFAULT_MAX_SEQUENCE_LEN, ELEMENT_SIZE, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::{recv_sequence, SequenceReader};
pub use writer::{send_sequence, SequenceWriter};
