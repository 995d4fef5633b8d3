//! Per-connection HTTP state
//!
//! [`HttpConn`] owns the client socket, the in/out byte buffers, the
//! incremental parser and the response being written. All of its methods
//! are non-blocking; the one-shot event discipline in the server guarantees
//! at most one thread runs them at a time for a given connection.

use super::request::{FeedOutcome, Method, RequestParser};
use super::response::Response;
use crate::buffer::ByteBuffer;
use crate::pool::store::AuthHook;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Below this many pending output bytes a level-triggered writer stops
/// looping and waits for the next readiness event.
const WRITE_CONTINUE_THRESHOLD: usize = 10240;

/// What a connection wants from the reactor after a processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    WantRead,
    WantWrite,
}

/// Request-handling context shared by every connection: the static file
/// root and the (optional) form authentication hook.
pub struct ServeContext {
    pub doc_root: PathBuf,
    pub auth: Option<Arc<dyn AuthHook>>,
}

pub struct HttpConn {
    socket: OwnedFd,
    peer: SocketAddr,
    edge_triggered: bool,
    in_buf: ByteBuffer,
    out_buf: ByteBuffer,
    parser: RequestParser,
    response: Option<Response>,
    body_written: usize,
    keep_alive: bool,
}

impl HttpConn {
    pub fn new(socket: OwnedFd, peer: SocketAddr, edge_triggered: bool) -> Self {
        HttpConn {
            socket,
            peer,
            edge_triggered,
            in_buf: ByteBuffer::new(),
            out_buf: ByteBuffer::new(),
            parser: RequestParser::new(),
            response: None,
            body_written: 0,
            keep_alive: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Drain the socket into the input buffer. Edge-triggered connections
    /// loop until the socket would block; level-triggered ones take a
    /// single scatter read. An orderly peer close surfaces as
    /// `UnexpectedEof`.
    pub fn read_to_buffer(&mut self) -> io::Result<usize> {
        let mut total = 0;
        loop {
            match self.in_buf.read_from_fd(self.fd()) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"));
                }
                Ok(n) => {
                    total += n;
                    if !self.edge_triggered {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Write headers and body with one `writev` per pass: the output
    /// buffer's readable region first, then the unwritten tail of the
    /// mapped file. Loops until done or the socket would block.
    pub fn write_from_iov(&mut self) -> io::Result<usize> {
        let mut total = 0;
        loop {
            let n = {
                let head = self.out_buf.peek();
                let body = self.response.as_ref().map(|r| r.file()).unwrap_or(&[]);
                let rest = &body[self.body_written..];
                let iov = [
                    libc::iovec {
                        iov_base: head.as_ptr() as *mut libc::c_void,
                        iov_len: head.len(),
                    },
                    libc::iovec {
                        iov_base: rest.as_ptr() as *mut libc::c_void,
                        iov_len: rest.len(),
                    },
                ];
                unsafe { libc::writev(self.fd(), iov.as_ptr(), 2) }
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(err),
                }
            }
            let n = n as usize;
            total += n;
            let head = n.min(self.out_buf.readable());
            self.out_buf.consume(head);
            self.body_written += n - head;
            if self.to_write_bytes() == 0 {
                break;
            }
            if !(self.edge_triggered || self.to_write_bytes() > WRITE_CONTINUE_THRESHOLD) {
                break;
            }
        }
        Ok(total)
    }

    /// Bytes still owed to the peer for the current response.
    pub fn to_write_bytes(&self) -> usize {
        let body_len = self.response.as_ref().map(|r| r.file().len()).unwrap_or(0);
        self.out_buf.readable() + body_len - self.body_written
    }

    pub fn write_done(&self) -> bool {
        self.to_write_bytes() == 0
    }

    /// Feed buffered input to the parser; on a complete request run the
    /// auth hook if the target asks for it and assemble the response. A
    /// parse failure synthesizes a 400 on a closing connection.
    pub fn process(&mut self, ctx: &ServeContext) -> ProcessOutcome {
        match self.parser.feed(&mut self.in_buf) {
            Ok(FeedOutcome::NeedMore) => ProcessOutcome::WantRead,
            Ok(FeedOutcome::Done) => {
                self.apply_auth(ctx);
                self.keep_alive = self.parser.keep_alive();
                self.build_response(ctx, None);
                ProcessOutcome::WantWrite
            }
            Err(err) => {
                warn!(peer = %self.peer, error = %err, "bad request");
                self.keep_alive = false;
                self.build_response(ctx, Some(400));
                ProcessOutcome::WantWrite
            }
        }
    }

    /// Drop the finished exchange and get ready for the next request.
    /// Input already buffered (pipelined bytes) is kept.
    pub fn reset_for_keep_alive(&mut self) {
        self.response = None;
        self.body_written = 0;
        self.out_buf.consume_all();
        self.parser.reset();
    }

    pub fn has_buffered_input(&self) -> bool {
        self.in_buf.readable() > 0
    }

    fn apply_auth(&mut self, ctx: &ServeContext) {
        if self.parser.method() != Some(Method::Post) {
            return;
        }
        let is_login = match self.parser.path() {
            "/register.html" => false,
            "/login.html" => true,
            _ => return,
        };
        let username = self.parser.form("username").unwrap_or("");
        let password = self.parser.form("password").unwrap_or("");
        let ok = match &ctx.auth {
            Some(auth) => auth.verify(username, password, is_login),
            None => false,
        };
        self.parser
            .set_path(if ok { "/welcome.html" } else { "/error.html" });
    }

    fn build_response(&mut self, ctx: &ServeContext, code: Option<u16>) {
        let mut response = Response::new(
            ctx.doc_root.clone(),
            self.parser.path(),
            self.keep_alive,
            code,
        );
        self.out_buf.consume_all();
        response.build(&mut self.out_buf);
        self.body_written = 0;
        self.response = Some(response);
    }
}
