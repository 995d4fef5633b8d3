//! Listener socket setup and non-blocking accept

use super::{Error, Result};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Listen backlog passed to `listen(2)`.
const BACKLOG: libc::c_int = 1024;

/// Create a non-blocking IPv4 listener on `port` (0 picks an ephemeral
/// port). `SO_REUSEADDR` is always set; with `linger` the socket lingers
/// for one second on close so queued response bytes get flushed.
pub fn bind_listener(port: u16, linger: bool) -> Result<OwnedFd> {
    listener_socket(port, linger).map_err(|source| Error::Bind { port, source })
}

fn listener_socket(port: u16, linger: bool) -> io::Result<OwnedFd> {
    let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    if linger {
        let opt = libc::linger {
            l_onoff: 1,
            l_linger: 1,
        };
        setsockopt(raw, libc::SOL_SOCKET, libc::SO_LINGER, &opt)?;
    }
    setsockopt(raw, libc::SOL_SOCKET, libc::SO_REUSEADDR, &1i32)?;

    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: libc::INADDR_ANY.to_be(),
        },
        sin_zero: [0; 8],
    };
    let rc = unsafe {
        libc::bind(
            raw,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::listen(raw, BACKLOG) } < 0 {
        return Err(io::Error::last_os_error());
    }
    nonblocking(raw)?;
    Ok(fd)
}

/// The port a listener actually bound to.
pub fn local_port(fd: RawFd) -> Result<u16> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockname(
            fd,
            &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(u16::from_be(addr.sin_port))
}

/// Set `O_NONBLOCK`. Edge-triggered registrations require this.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    nonblocking(fd).map_err(Error::Io)
}

fn nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Accept one pending connection. Returns `WouldBlock` when the accept
/// queue is empty.
pub fn accept(listen_fd: RawFd) -> Result<(OwnedFd, SocketAddr)> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let raw = unsafe {
        libc::accept(
            listen_fd,
            &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut len,
        )
    };
    if raw < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    let peer = SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
        u16::from_be(addr.sin_port),
    ));
    Ok((fd, peer))
}

fn setsockopt<T>(fd: RawFd, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
