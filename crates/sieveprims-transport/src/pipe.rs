use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tracing::debug;

/// Capacity assumed for pipes on platforms where it cannot be queried.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const PORTABLE_PIPE_CAPACITY: usize = 16 * 1024;

/// Read end of a unidirectional pipe. Closed on drop.
pub struct PipeReader {
    file: File,
}

/// Write end of a unidirectional pipe. Closed on drop.
pub struct PipeWriter {
    file: File,
}

/// Create an anonymous pipe.
///
/// Both descriptors are marked close-on-exec.
pub fn pipe() -> io::Result<(PipeReader, PipeWriter)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: `fds` is a valid, writable two-element array as required by pipe(2).
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read.as_fd())?;
    set_cloexec(write.as_fd())?;

    debug!(read = fds[0], write = fds[1], "opened anonymous pipe");
    Ok((PipeReader::from_fd(read), PipeWriter::from_fd(write)))
}

impl PipeReader {
    pub(crate) fn from_fd(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }

    /// Current kernel buffer size of the pipe, if the platform exposes it.
    pub fn capacity(&self) -> io::Result<usize> {
        capacity(self.file.as_fd())
    }

    /// Grow the pipe buffer to hold at least `bytes`. Returns the granted size.
    pub fn reserve_capacity(&self, bytes: usize) -> io::Result<usize> {
        reserve_capacity(self.file.as_fd(), bytes)
    }
}

impl PipeWriter {
    pub(crate) fn from_fd(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }

    /// Current kernel buffer size of the pipe, if the platform exposes it.
    pub fn capacity(&self) -> io::Result<usize> {
        capacity(self.file.as_fd())
    }

    /// Grow the pipe buffer to hold at least `bytes`. Returns the granted size.
    pub fn reserve_capacity(&self, bytes: usize) -> io::Result<usize> {
        reserve_capacity(self.file.as_fd(), bytes)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsFd for PipeReader {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsFd for PipeWriter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("fd", &self.file.as_raw_fd())
            .finish()
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("fd", &self.file.as_raw_fd())
            .finish()
    }
}

fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: `fd` is a live descriptor borrowed for the duration of the call.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above; only the descriptor flags are modified.
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Clear `O_NONBLOCK` on a descriptor opened non-blocking.
pub(crate) fn set_blocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: `fd` is a live descriptor borrowed for the duration of the call.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above; only the file status flags are modified.
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn capacity(fd: BorrowedFd<'_>) -> io::Result<usize> {
    // SAFETY: `fd` is a live pipe descriptor; F_GETPIPE_SZ takes no argument.
    let size = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETPIPE_SZ) };
    if size < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(size as usize)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn capacity(_fd: BorrowedFd<'_>) -> io::Result<usize> {
    Ok(PORTABLE_PIPE_CAPACITY)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn reserve_capacity(fd: BorrowedFd<'_>, bytes: usize) -> io::Result<usize> {
    let current = capacity(fd)?;
    if current >= bytes {
        return Ok(current);
    }

    let requested = libc::c_int::try_from(bytes).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pipe capacity {bytes} out of range"),
        )
    })?;
    // SAFETY: `fd` is a live pipe descriptor and `requested` is a positive int.
    let granted = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETPIPE_SZ, requested) };
    if granted < 0 {
        return Err(io::Error::last_os_error());
    }
    debug!(fd = fd.as_raw_fd(), requested = bytes, granted, "resized pipe buffer");
    Ok(granted as usize)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn reserve_capacity(_fd: BorrowedFd<'_>, bytes: usize) -> io::Result<usize> {
    if bytes <= PORTABLE_PIPE_CAPACITY {
        Ok(PORTABLE_PIPE_CAPACITY)
    } else {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot grow pipe buffer to {bytes} bytes on this platform"),
        ))
    }
}
