//! Readiness multiplexer over epoll(7)
//!
//! The reactor registers file descriptors with an event mask and blocks in
//! [`Reactor::wait`] until some of them become ready. Registration changes
//! take `&self`: `epoll_ctl` is thread-safe, which is what lets worker
//! threads re-arm one-shot client registrations without going through the
//! reactor thread.

use super::{Error, Result};
use std::io;
use std::os::fd::RawFd;

/// Event mask bits, re-exported as plain `u32` flags.
pub const READ: u32 = libc::EPOLLIN as u32;
pub const WRITE: u32 = libc::EPOLLOUT as u32;
pub const EDGE: u32 = libc::EPOLLET as u32;
pub const ONESHOT: u32 = libc::EPOLLONESHOT as u32;
pub const RDHUP: u32 = libc::EPOLLRDHUP as u32;
pub const ERR: u32 = libc::EPOLLERR as u32;
pub const HUP: u32 = libc::EPOLLHUP as u32;

/// A single readiness notification.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    pub events: u32,
}

impl Event {
    pub fn readable(&self) -> bool {
        self.events & READ != 0
    }

    pub fn writable(&self) -> bool {
        self.events & WRITE != 0
    }

    /// Error or hangup condition; these are reported regardless of the mask.
    pub fn closed(&self) -> bool {
        self.events & (RDHUP | ERR | HUP) != 0
    }
}

/// epoll instance. Closes the epoll fd on drop.
#[derive(Debug)]
pub struct Reactor {
    epfd: RawFd,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(Reactor { epfd })
    }

    /// Register `fd` with the given event mask.
    pub fn add(&self, fd: RawFd, events: u32) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, events)
    }

    /// Change the mask of an already-registered fd. Required to re-arm a
    /// one-shot registration after its event was delivered.
    pub fn modify(&self, fd: RawFd, events: u32) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, events)
    }

    /// Deregister `fd`.
    pub fn remove(&self, fd: RawFd) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0)
    }

    /// Block up to `timeout_ms` for readiness. `-1` blocks indefinitely,
    /// `0` polls. A signal interruption yields an empty batch.
    pub fn wait(&self, max_events: usize, timeout_ms: i32) -> Result<Vec<Event>> {
        let mut raw: Vec<libc::epoll_event> = Vec::with_capacity(max_events);
        let n = unsafe {
            libc::epoll_wait(self.epfd, raw.as_mut_ptr(), max_events as i32, timeout_ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(Error::Io(err));
        }
        unsafe { raw.set_len(n as usize) };
        Ok(raw
            .iter()
            .map(|ev| Event {
                fd: ev.u64 as RawFd,
                events: ev.events,
            })
            .collect())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> Result<()> {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}
