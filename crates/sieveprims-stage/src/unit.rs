use std::io;
use std::panic::AssertUnwindSafe;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, StageError, UnitStatus};
use crate::filter::StageOutcome;
use crate::pair::UnitEnds;

/// Poll interval while waiting on a unit with a deadline.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Exit code of a forked unit whose stage returned an error.
const UNIT_ERROR_EXIT: i32 = 1;
/// Exit code of a forked unit whose stage panicked.
const UNIT_PANIC_EXIT: i32 = 101;

/// Which execution unit runs a stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnitKind {
    /// A forked child process with its own address space.
    #[default]
    Process,
    /// A thread that owns its channel ends and its own buffers.
    Thread,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Process => "process",
            UnitKind::Thread => "thread",
        }
    }
}

/// A spawned execution unit that must be reaped with [`UnitHandle::join`].
#[derive(Debug)]
pub struct UnitHandle {
    stage: usize,
    inner: Option<UnitInner>,
}

#[derive(Debug)]
enum UnitInner {
    Process(libc::pid_t),
    Thread(JoinHandle<Result<StageOutcome>>),
}

impl UnitHandle {
    pub fn kind(&self) -> Option<UnitKind> {
        match self.inner {
            Some(UnitInner::Process(_)) => Some(UnitKind::Process),
            Some(UnitInner::Thread(_)) => Some(UnitKind::Thread),
            None => None,
        }
    }

    /// Block until the unit terminates and check that it succeeded.
    ///
    /// With a `timeout`, a process unit still running at the deadline is
    /// killed and reaped before [`StageError::Timeout`] is returned. Threads
    /// cannot be killed, so thread units ignore the timeout.
    pub fn join(mut self, timeout: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        let result = match self.inner.take() {
            Some(UnitInner::Process(pid)) => join_process(pid, timeout),
            Some(UnitInner::Thread(handle)) => join_thread(handle),
            None => Ok(()),
        };
        debug!(
            stage = self.stage,
            elapsed_us = started.elapsed().as_micros() as u64,
            ok = result.is_ok(),
            "reaped execution unit"
        );
        result
    }

    pub(crate) fn process(stage: usize, pid: libc::pid_t) -> Self {
        Self {
            stage,
            inner: Some(UnitInner::Process(pid)),
        }
    }
}

impl Drop for UnitHandle {
    fn drop(&mut self) {
        match self.inner.take() {
            Some(UnitInner::Process(pid)) => {
                warn!(stage = self.stage, pid, "killing unjoined execution unit");
                // SAFETY: `pid` is our own unreaped child, so it cannot have been recycled.
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
                let _ = wait_pid(pid, 0);
            }
            Some(UnitInner::Thread(_)) => {
                warn!(stage = self.stage, "detaching unjoined execution unit thread");
            }
            None => {}
        }
    }
}

/// Run `ends` on a dedicated thread.
pub(crate) fn spawn_thread(stage: usize, ends: UnitEnds) -> Result<UnitHandle> {
    let handle = std::thread::Builder::new()
        .name(format!("sieve-stage-{stage}"))
        .spawn(move || ends.run())
        .map_err(StageError::SpawnFailed)?;
    debug!(stage, "spawned thread unit");
    Ok(UnitHandle {
        stage,
        inner: Some(UnitInner::Thread(handle)),
    })
}

/// Body of a forked unit. Never returns.
pub(crate) fn run_forked(ends: UnitEnds) -> ! {
    let code = match std::panic::catch_unwind(AssertUnwindSafe(|| ends.run())) {
        Ok(Ok(_)) => 0,
        Ok(Err(_)) => UNIT_ERROR_EXIT,
        Err(_) => UNIT_PANIC_EXIT,
    };
    // SAFETY: `_exit` ends the child without running the parent's atexit
    // handlers or flushing stdio buffers it inherited.
    unsafe { libc::_exit(code) }
}

fn join_thread(handle: JoinHandle<Result<StageOutcome>>) -> Result<()> {
    match handle.join() {
        Ok(Ok(outcome)) => {
            debug!(
                divisor = ?outcome.divisor,
                received = outcome.received,
                survivors = outcome.survivors,
                "thread unit finished"
            );
            Ok(())
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(StageError::UnitFailed(UnitStatus::Panicked)),
    }
}

fn join_process(pid: libc::pid_t, timeout: Option<Duration>) -> Result<()> {
    let status = match timeout {
        None => wait_pid(pid, 0)
            .map_err(StageError::WaitFailed)?
            .ok_or_else(|| StageError::WaitFailed(io::Error::other("waitpid returned no status")))?,
        Some(limit) => {
            let deadline = Instant::now() + limit;
            loop {
                if let Some(status) =
                    wait_pid(pid, libc::WNOHANG).map_err(StageError::WaitFailed)?
                {
                    break status;
                }
                if Instant::now() >= deadline {
                    warn!(pid, ?limit, "execution unit timed out; killing");
                    // SAFETY: `pid` is our own unreaped child.
                    unsafe {
                        libc::kill(pid, libc::SIGKILL);
                    }
                    wait_pid(pid, 0).map_err(StageError::WaitFailed)?;
                    return Err(StageError::Timeout(limit));
                }
                std::thread::sleep(REAP_POLL_INTERVAL);
            }
        }
    };

    let status = decode_status(status);
    if status.success() {
        Ok(())
    } else {
        Err(StageError::UnitFailed(status))
    }
}

/// `waitpid` with `EINTR` retried. `Ok(None)` means still running (`WNOHANG`).
fn wait_pid(pid: libc::pid_t, flags: libc::c_int) -> io::Result<Option<libc::c_int>> {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid writable int for the duration of the call.
        let rc = unsafe { libc::waitpid(pid, &mut status, flags) };
        if rc == pid {
            return Ok(Some(status));
        }
        if rc == 0 {
            return Ok(None);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

fn decode_status(status: libc::c_int) -> UnitStatus {
    if libc::WIFEXITED(status) {
        UnitStatus::Exited(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        UnitStatus::Signaled(libc::WTERMSIG(status))
    } else {
        UnitStatus::Exited(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fork a child that runs `body` and exits with its return value.
    fn fork_with(body: impl FnOnce() -> i32) -> libc::pid_t {
        // SAFETY: the child only runs `body` and then calls `_exit`.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork should succeed");
        if pid == 0 {
            let code = body();
            // SAFETY: terminate the child immediately.
            unsafe { libc::_exit(code) }
        }
        pid
    }

    #[test]
    fn process_exit_codes_are_decoded() {
        let ok = UnitHandle::process(0, fork_with(|| 0));
        assert!(ok.join(None).is_ok());

        let failed = UnitHandle::process(1, fork_with(|| 3));
        assert!(matches!(
            failed.join(None),
            Err(StageError::UnitFailed(UnitStatus::Exited(3)))
        ));
    }

    #[test]
    fn hung_process_is_killed_on_timeout() {
        let pid = fork_with(|| {
            std::thread::sleep(Duration::from_secs(30));
            0
        });
        let handle = UnitHandle::process(0, pid);
        let started = Instant::now();
        let err = handle.join(Some(Duration::from_millis(50))).unwrap_err();

        assert!(matches!(err, StageError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
        // Already reaped: a second wait finds no such child.
        let again = wait_pid(pid, libc::WNOHANG).unwrap_err();
        assert_eq!(again.raw_os_error(), Some(libc::ECHILD));
    }

    #[test]
    fn dropping_unjoined_process_reaps_it() {
        let pid = fork_with(|| {
            std::thread::sleep(Duration::from_secs(30));
            0
        });
        drop(UnitHandle::process(0, pid));
        let again = wait_pid(pid, libc::WNOHANG).unwrap_err();
        assert_eq!(again.raw_os_error(), Some(libc::ECHILD));
    }

    #[test]
    fn signaled_status_is_reported() {
        let pid = fork_with(|| {
            std::thread::sleep(Duration::from_secs(30));
            0
        });
        // SAFETY: `pid` is our own child.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        let err = UnitHandle::process(0, pid).join(None).unwrap_err();
        assert!(matches!(
            err,
            StageError::UnitFailed(UnitStatus::Signaled(libc::SIGTERM))
        ));
    }

    #[test]
    fn kind_names() {
        assert_eq!(UnitKind::default(), UnitKind::Process);
        assert_eq!(UnitKind::Thread.as_str(), "thread");
    }
}
