use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::channel::{Channel, ChannelKind, Conduit, Direction};
use crate::error::{Result, TransportError};
use crate::pipe::{set_blocking, PipeReader, PipeWriter};

static NEXT_ARTIFACT: AtomicU64 = AtomicU64::new(0);

/// Channel backed by named FIFOs in a directory.
///
/// Each `open` creates a uniquely named FIFO, opens both ends without blocking,
/// and returns the artifact guard alongside the ends. The FIFO is unlinked when
/// the guard drops.
#[derive(Clone, Debug)]
pub struct NamedChannel {
    dir: PathBuf,
    prefix: String,
    mode: u32,
}

impl NamedChannel {
    /// Default FIFO name prefix.
    pub const DEFAULT_PREFIX: &'static str = "sieveprims";
    /// Default permission mode for created FIFOs.
    pub const DEFAULT_MODE: u32 = 0o600;

    /// Create FIFOs under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: Self::DEFAULT_PREFIX.to_string(),
            mode: Self::DEFAULT_MODE,
        }
    }

    /// Create FIFOs under the system temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Override the artifact name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Override the permission mode of created FIFOs.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Directory the FIFOs are created in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact name: `<prefix>-<pid>-<nanos>-<seq>-<stage>-<direction>.fifo`.
    fn artifact_path(&self, stage: usize, direction: Direction) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = NEXT_ARTIFACT.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}-{}-{nanos}-{seq}-{stage}-{}.fifo",
            self.prefix,
            std::process::id(),
            direction.as_str()
        ))
    }
}

impl Default for NamedChannel {
    fn default() -> Self {
        Self::in_temp_dir()
    }
}

impl Channel for NamedChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Named
    }

    fn open(&self, stage: usize, direction: Direction) -> Result<Conduit> {
        let artifact = FifoArtifact::create(self.artifact_path(stage, direction), self.mode)?;
        let setup_failed = |source| TransportError::ChannelSetupFailed {
            kind: ChannelKind::Named.as_str(),
            source,
        };

        // Opening the read side non-blocking first lets the write side open
        // immediately instead of waiting for a peer.
        let read = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(artifact.path())
            .map_err(setup_failed)?;
        let write = OpenOptions::new()
            .write(true)
            .open(artifact.path())
            .map_err(setup_failed)?;
        let read = OwnedFd::from(read);
        set_blocking(read.as_fd()).map_err(setup_failed)?;

        debug!(
            stage,
            direction = direction.as_str(),
            path = ?artifact.path(),
            "opened named conduit"
        );
        Ok(Conduit {
            reader: PipeReader::from_fd(read),
            writer: PipeWriter::from_fd(OwnedFd::from(write)),
            artifact: Some(artifact),
        })
    }
}

/// A FIFO on disk, removed on drop.
///
/// Only the process that created the FIFO removes it, and only if the path
/// still refers to the same inode.
#[derive(Debug)]
pub struct FifoArtifact {
    path: PathBuf,
    identity: (u64, u64),
    owner: u32,
}

impl FifoArtifact {
    /// Create a FIFO at `path`, replacing a stale FIFO left by a previous run.
    ///
    /// Existing non-FIFO files are never removed.
    pub fn create(path: impl Into<PathBuf>, mode: u32) -> Result<Self> {
        let path = path.into();
        let setup_failed = |path: &Path, source| TransportError::ArtifactSetup {
            path: path.to_path_buf(),
            source,
        };

        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_fifo() => {
                debug!(?path, "removing stale fifo");
                std::fs::remove_file(&path).map_err(|e| setup_failed(&path, e))?;
            }
            Ok(_) => {
                return Err(setup_failed(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a fifo",
                    ),
                ));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(setup_failed(&path, err)),
        }

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            setup_failed(
                &path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path contains an interior NUL byte",
                ),
            )
        })?;
        // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
        if rc != 0 {
            return Err(setup_failed(&path, std::io::Error::last_os_error()));
        }

        let metadata = std::fs::symlink_metadata(&path).map_err(|e| setup_failed(&path, e))?;
        debug!(?path, "created fifo");

        Ok(Self {
            path,
            identity: (metadata.dev(), metadata.ino()),
            owner: std::process::id(),
        })
    }

    /// Path of the FIFO.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FifoArtifact {
    fn drop(&mut self) {
        // A forked unit inherits the guard; cleanup belongs to the creator.
        if std::process::id() != self.owner {
            return;
        }
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_fifo() && (metadata.dev(), metadata.ino()) == self.identity
            {
                debug!(path = ?self.path, "removing fifo");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "fifo path identity changed; skipping cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sieveprims-fifo-{tag}-{}-{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn artifact_created_and_removed_on_drop() {
        let dir = unique_temp_dir("drop");
        let path = dir.join("a.fifo");

        let artifact = FifoArtifact::create(&path, NamedChannel::DEFAULT_MODE).unwrap();
        let metadata = std::fs::symlink_metadata(&path).unwrap();
        assert!(metadata.file_type().is_fifo());
        assert_eq!(metadata.mode() & 0o777, 0o600);

        drop(artifact);
        assert!(!path.exists(), "fifo should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_fifo_is_replaced() {
        let dir = unique_temp_dir("stale");
        let path = dir.join("stale.fifo");

        let first = FifoArtifact::create(&path, 0o600).unwrap();
        std::mem::forget(first);
        let second = FifoArtifact::create(&path, 0o600).unwrap();
        assert!(path.exists());

        drop(second);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn refuses_to_replace_regular_file() {
        let dir = unique_temp_dir("regular");
        let path = dir.join("regular.fifo");
        std::fs::write(&path, b"not-a-fifo").unwrap();

        let result = FifoArtifact::create(&path, 0o600);
        assert!(matches!(result, Err(TransportError::ArtifactSetup { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), b"not-a-fifo");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_does_not_remove_replaced_path() {
        let dir = unique_temp_dir("replaced");
        let path = dir.join("swap.fifo");

        let artifact = FifoArtifact::create(&path, 0o600).unwrap();
        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, b"replacement").unwrap();

        drop(artifact);
        assert!(path.exists(), "drop must not remove a path whose identity changed");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn named_channel_roundtrip_and_cleanup() {
        let dir = unique_temp_dir("channel");
        let channel = NamedChannel::new(&dir).with_prefix("test");
        assert_eq!(channel.kind(), ChannelKind::Named);

        let conduit = channel.open(3, Direction::Request).unwrap();
        let artifact_path = conduit.artifact.as_ref().unwrap().path().to_path_buf();
        let name = artifact_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("test-"));
        assert!(name.ends_with("-3-req.fifo"));
        assert_eq!(entries(&dir), 1);

        let (mut reader, mut writer, artifact) = conduit.into_parts();
        writer.write_all(b"through the fifo").unwrap();
        drop(writer);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "through the fifo");

        drop(artifact);
        assert_eq!(entries(&dir), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn named_channel_in_missing_dir_fails_setup() {
        let dir = unique_temp_dir("missing").join("nope");
        let err = NamedChannel::new(&dir)
            .open(0, Direction::Response)
            .unwrap_err();
        assert!(err.is_setup());
    }
}
