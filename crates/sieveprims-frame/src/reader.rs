use std::io::Read;

use bytes::{Buf, BytesMut};
use sieveprims_transport::{recv_all, TransportError};
use tracing::trace;

use crate::codec::{decode_header, FrameConfig, ELEMENT_SIZE, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Reads complete sequences from any `Read` channel.
///
/// Handles partial reads internally, so callers always get whole sequences.
pub struct SequenceReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> SequenceReader<T> {
    /// Create a new sequence reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new sequence reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            config,
        }
    }

    /// Read the next sequence (blocking).
    ///
    /// Returns `Ok(None)` when the channel closed before any byte of the
    /// length prefix arrived. A close anywhere inside the frame is
    /// [`FrameError::Framing`].
    pub fn recv_sequence(&mut self) -> Result<Option<Vec<i32>>> {
        let mut header = [0u8; HEADER_SIZE];
        match recv_all(&mut self.inner, &mut header) {
            Ok(()) => {}
            Err(err) if err.is_clean_eof() => return Ok(None),
            Err(TransportError::Truncated {
                delivered,
                expected,
            }) => return Err(FrameError::Framing { expected, delivered }),
            Err(err) => return Err(err.into()),
        }

        let len = decode_header(header, self.config.max_sequence_len)?;
        trace!(len, "received frame header");
        if len == 0 {
            return Ok(Some(Vec::new()));
        }

        let payload_size = len * ELEMENT_SIZE;
        self.buf.clear();
        self.buf.resize(payload_size, 0);
        match recv_all(&mut self.inner, &mut self.buf[..]) {
            Ok(()) => {}
            Err(TransportError::Truncated { delivered, .. }) => {
                return Err(FrameError::Framing {
                    expected: HEADER_SIZE + payload_size,
                    delivered: HEADER_SIZE + delivered,
                })
            }
            Err(err) => return Err(err.into()),
        }

        let mut payload = &self.buf[..];
        let mut seq = Vec::with_capacity(len);
        while payload.has_remaining() {
            seq.push(payload.get_i32_ne());
        }
        Ok(Some(seq))
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying channel.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner channel.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SequenceReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceReader")
            .field("inner", &self.inner)
            .field("config", &self.config)
            .finish()
    }
}

/// Read one sequence from `channel` with default configuration.
pub fn recv_sequence<R: Read>(channel: &mut R) -> Result<Option<Vec<i32>>> {
    SequenceReader::new(channel).recv_sequence()
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, ErrorKind};

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::encode_sequence;

    fn wire(seqs: &[&[i32]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for seq in seqs {
            encode_sequence(seq, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_sequence() {
        let mut reader = SequenceReader::new(Cursor::new(wire(&[&[4, 6, 9]])));
        assert_eq!(reader.recv_sequence().unwrap(), Some(vec![4, 6, 9]));
        assert_eq!(reader.recv_sequence().unwrap(), None);
    }

    #[test]
    fn empty_frame_is_not_end_of_stream() {
        let mut reader = SequenceReader::new(Cursor::new(wire(&[&[], &[5]])));
        assert_eq!(reader.recv_sequence().unwrap(), Some(vec![]));
        assert_eq!(reader.recv_sequence().unwrap(), Some(vec![5]));
        assert_eq!(reader.recv_sequence().unwrap(), None);
    }

    #[test]
    fn closed_channel_is_clean_end_of_stream() {
        let mut reader = SequenceReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.recv_sequence().unwrap().is_none());
    }

    #[test]
    fn close_inside_header_is_framing_error() {
        let mut reader = SequenceReader::new(Cursor::new(vec![3u8, 0]));
        let err = reader.recv_sequence().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Framing {
                expected: 4,
                delivered: 2
            }
        ));
    }

    #[test]
    fn close_inside_payload_is_framing_error() {
        let mut partial = BytesMut::new();
        partial.put_i32_ne(3);
        partial.put_i32_ne(4);

        let mut reader = SequenceReader::new(Cursor::new(partial.to_vec()));
        let err = reader.recv_sequence().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Framing {
                expected: 16,
                delivered: 8
            }
        ));
        assert!(err.is_framing());
    }

    #[test]
    fn header_without_payload_is_framing_error() {
        let mut reader = SequenceReader::new(Cursor::new(2i32.to_ne_bytes().to_vec()));
        assert!(matches!(
            reader.recv_sequence(),
            Err(FrameError::Framing { delivered: 4, .. })
        ));
    }

    #[test]
    fn negative_length_in_stream() {
        let mut reader = SequenceReader::new(Cursor::new((-5i32).to_ne_bytes().to_vec()));
        assert!(matches!(
            reader.recv_sequence(),
            Err(FrameError::NegativeLength(-5))
        ));
    }

    #[test]
    fn oversized_sequence_in_stream() {
        let cfg = FrameConfig {
            max_sequence_len: 2,
        };
        let mut reader = SequenceReader::with_config(Cursor::new(wire(&[&[1, 2, 3]])), cfg);
        assert!(matches!(
            reader.recv_sequence(),
            Err(FrameError::SequenceTooLong { len: 3, max: 2 })
        ));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn partial_read_handling() {
        let reader = ByteByByteReader {
            bytes: wire(&[&[11, 13, 17, 19]]),
            pos: 0,
        };
        let mut reader = SequenceReader::new(reader);
        assert_eq!(reader.recv_sequence().unwrap(), Some(vec![11, 13, 17, 19]));
    }

    struct InterruptedEveryOtherRead {
        calls: usize,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedEveryOtherRead {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn interrupted_reads_retry() {
        let reader = InterruptedEveryOtherRead {
            calls: 0,
            inner: Cursor::new(wire(&[&[2, 3, 5]])),
        };
        let mut reader = SequenceReader::new(reader);
        assert_eq!(reader.recv_sequence().unwrap(), Some(vec![2, 3, 5]));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::PermissionDenied))
        }
    }

    #[test]
    fn transport_failure_is_not_framing() {
        let err = SequenceReader::new(FailingReader)
            .recv_sequence()
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transfer(TransportError::TransferFailed(_))
        ));
        assert!(!err.is_framing());
    }

    #[test]
    fn free_function_reads_one_sequence() {
        let mut cursor = Cursor::new(wire(&[&[7], &[8]]));
        assert_eq!(recv_sequence(&mut cursor).unwrap(), Some(vec![7]));
        assert_eq!(recv_sequence(&mut cursor).unwrap(), Some(vec![8]));
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut reader = SequenceReader::new(Cursor::new(Vec::<u8>::new()));
        let _ = reader.get_ref();
        let _ = reader.get_mut();
        assert_eq!(
            reader.config().max_sequence_len,
            crate::DEFAULT_MAX_SEQUENCE_LEN
        );
        let _inner = reader.into_inner();
    }
}
