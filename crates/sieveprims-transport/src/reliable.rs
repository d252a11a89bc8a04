use std::io::{ErrorKind, Read, Write};

use crate::error::{Result, TransportError};

/// Write all of `buf` to `channel`.
///
/// Partial writes are looped over and `EINTR` is retried. A write that
/// accepts zero bytes means the channel is gone.
pub fn send_all<W: Write + ?Sized>(channel: &mut W, buf: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < buf.len() {
        match channel.write(&buf[offset..]) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransportError::TransferFailed(err)),
        }
    }
    Ok(())
}

/// Fill all of `buf` from `channel`.
///
/// On premature end-of-stream returns [`TransportError::Truncated`] carrying
/// the number of bytes that did arrive, so callers can tell a clean close at a
/// boundary (`delivered == 0`) from a truncated read.
pub fn recv_all<R: Read + ?Sized>(channel: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match channel.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(TransportError::Truncated {
                    delivered: filled,
                    expected: buf.len(),
                })
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransportError::TransferFailed(err)),
        }
    }
    Ok(())
}

/// Flush `channel`, retrying on `EINTR`.
pub fn flush_all<W: Write + ?Sized>(channel: &mut W) -> Result<()> {
    loop {
        match channel.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransportError::TransferFailed(err)),
        }
    }
}
