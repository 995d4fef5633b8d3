//! Cross-thread reactor wakeup
//!
//! An `eventfd` registered level-triggered in the reactor. Worker threads
//! call [`Waker::wake`] after queueing a connection close so the reactor
//! loops around promptly instead of sleeping out its timer timeout.

use super::{Error, Result};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

#[derive(Debug)]
pub struct Waker {
    fd: OwnedFd,
}

impl Waker {
    pub fn new() -> Result<Self> {
        let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if raw < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(Waker {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Post a wakeup. Safe from any thread; a saturated counter still
    /// leaves the fd readable, so the error is ignored.
    pub fn wake(&self) {
        let one: u64 = 1;
        unsafe {
            libc::write(
                self.fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
    }

    /// Clear pending wakeups. Called by the reactor when the fd polls
    /// readable.
    pub fn drain(&self) {
        let mut count: u64 = 0;
        unsafe {
            libc::read(
                self.fd(),
                &mut count as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
    }
}
