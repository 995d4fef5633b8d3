//! Server: listener, reactor loop, connection table, worker dispatch
//!
//! One reactor thread runs [`Server::run`]; socket work happens on a fixed
//! worker pool. Client fds are registered one-shot, so at most one worker
//! owns a connection at a time, and the worker re-arms the fd itself when
//! it is done. The connection table and the timer heap belong to the
//! reactor thread alone; workers reach the reactor only through
//! `Reactor::modify`, the close queue and the waker.
//!
//! A close is committed only on the reactor thread, and only once the
//! connection has no worker task in flight.

use crate::http::conn::{HttpConn, ProcessOutcome, ServeContext};
use crate::net::reactor::{self, Event, Reactor};
use crate::net::{self, socket, Waker};
use crate::pool::store::AuthHook;
use crate::timer::TimerHeap;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use threadpool::ThreadPool;
use tracing::{debug, error, info, warn};

/// Revisit delay when a close had to be deferred past an in-flight worker.
const CLOSE_GRACE_MS: u64 = 10;

/// Payload sent to a connection refused by back-pressure.
const BUSY_PAYLOAD: &[u8] = b"Server busy!";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port; 0 picks an ephemeral port (see [`Server::port`]).
    pub port: u16,
    /// Static file root.
    pub doc_root: PathBuf,
    /// Idle timeout per connection in milliseconds; 0 disables reclamation.
    pub timeout_ms: u64,
    /// SO_LINGER with a 1 second timeout on the listener.
    pub linger: bool,
    /// Edge-triggered listener registration.
    pub listen_et: bool,
    /// Edge-triggered client registrations.
    pub conn_et: bool,
    /// Worker pool size.
    pub workers: usize,
    /// Connection table capacity; new clients beyond it get
    /// `"Server busy!"` and an immediate close.
    pub max_fds: usize,
    /// Events per reactor wait batch.
    pub max_events: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            doc_root: PathBuf::from("www"),
            timeout_ms: 60_000,
            linger: false,
            listen_et: true,
            conn_et: true,
            workers: 8,
            max_fds: 65536,
            max_events: 1024,
        }
    }
}

struct ClientConn {
    fd: RawFd,
    conn: Mutex<HttpConn>,
    /// Worker tasks queued or running for this connection.
    pending: AtomicUsize,
    /// Set once a close has been decided; a worker seeing it never re-arms.
    closing: AtomicBool,
}

struct Shared {
    reactor: Reactor,
    waker: Waker,
    close_queue: Mutex<Vec<RawFd>>,
    running: AtomicBool,
    ctx: ServeContext,
    /// Base mask for client registrations (one-shot, rdhup, maybe edge).
    conn_events: u32,
}

/// Handle for stopping a running server from another thread.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.waker.wake();
    }
}

pub struct Server {
    config: ServerConfig,
    listener: OwnedFd,
    shared: Arc<Shared>,
    timers: TimerHeap,
    table: HashMap<RawFd, Arc<ClientConn>>,
    workers: ThreadPool,
}

impl Server {
    /// Bind the listener and set up the reactor, waker and worker pool.
    /// `auth` backs the form login/register flow; `None` makes every auth
    /// attempt fail.
    pub fn new(config: ServerConfig, auth: Option<Arc<dyn AuthHook>>) -> net::Result<Self> {
        let listener = socket::bind_listener(config.port, config.linger)?;
        let reactor = Reactor::new()?;
        let waker = Waker::new()?;

        let mut listen_events = reactor::READ;
        if config.listen_et {
            listen_events |= reactor::EDGE;
        }
        reactor.add(listener.as_raw_fd(), listen_events)?;
        reactor.add(waker.fd(), reactor::READ)?;

        let mut conn_events = reactor::ONESHOT | reactor::RDHUP;
        if config.conn_et {
            conn_events |= reactor::EDGE;
        }

        let shared = Arc::new(Shared {
            reactor,
            waker,
            close_queue: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            ctx: ServeContext {
                doc_root: config.doc_root.clone(),
                auth,
            },
            conn_events,
        });
        let workers = ThreadPool::new(config.workers.max(1));

        info!(
            port = socket::local_port(listener.as_raw_fd())?,
            doc_root = %config.doc_root.display(),
            workers = config.workers,
            "listening"
        );
        Ok(Server {
            config,
            listener,
            shared,
            timers: TimerHeap::new(),
            table: HashMap::new(),
            workers,
        })
    }

    /// The port actually bound (useful with `port: 0`).
    pub fn port(&self) -> u16 {
        socket::local_port(self.listener.as_raw_fd()).unwrap_or(0)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the event loop until the handle shuts it down or the listener
    /// fails.
    pub fn run(&mut self) -> net::Result<()> {
        let listen_fd = self.listener.as_raw_fd();
        while self.shared.running.load(Ordering::SeqCst) {
            let timeout = self.timers.next_tick_ms() as i32;
            let events = self.shared.reactor.wait(self.config.max_events, timeout)?;
            for ev in events {
                if ev.fd == listen_fd {
                    self.accept_clients();
                } else if ev.fd == self.shared.waker.fd() {
                    self.shared.waker.drain();
                } else {
                    self.dispatch(ev);
                }
            }
            self.drain_close_queue();
            self.sweep_timers();
        }
        let fds: Vec<RawFd> = self.table.keys().copied().collect();
        for fd in fds {
            self.close_conn(fd, "server shutdown");
        }
        info!("server loop exited");
        Ok(())
    }

    /// Accept until the queue is empty (required under an edge-triggered
    /// listener, harmless under level-triggered).
    fn accept_clients(&mut self) {
        loop {
            match socket::accept(self.listener.as_raw_fd()) {
                Ok((sock, peer)) => self.add_client(sock, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn add_client(&mut self, sock: OwnedFd, peer: SocketAddr) {
        if self.table.len() >= self.config.max_fds {
            warn!(%peer, "connection table full, refusing client");
            send_busy(&sock);
            return;
        }
        let fd = sock.as_raw_fd();
        if let Err(e) = socket::set_nonblocking(fd) {
            warn!(fd, error = %e, "set_nonblocking failed");
            return;
        }
        let client = Arc::new(ClientConn {
            fd,
            conn: Mutex::new(HttpConn::new(sock, peer, self.config.conn_et)),
            pending: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
        });
        if let Err(e) = self
            .shared
            .reactor
            .add(fd, self.shared.conn_events | reactor::READ)
        {
            warn!(fd, error = %e, "reactor add failed");
            return;
        }
        if self.config.timeout_ms > 0 {
            self.timers.add(fd, Duration::from_millis(self.config.timeout_ms));
        }
        self.table.insert(fd, client);
        debug!(fd, %peer, clients = self.table.len(), "client added");
    }

    fn dispatch(&mut self, ev: Event) {
        // the table is authoritative; a ready event for an fd closed
        // earlier in this batch is stale
        let Some(client) = self.table.get(&ev.fd).cloned() else {
            return;
        };
        if ev.closed() {
            self.try_close(ev.fd, "peer hangup");
            return;
        }
        if self.config.timeout_ms > 0 {
            self.timers
                .adjust(ev.fd, Duration::from_millis(self.config.timeout_ms));
        }
        let want_write = ev.writable();
        client.pending.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        self.workers.execute(move || {
            let rearm = if want_write {
                on_write(&client, &shared)
            } else {
                on_read(&client, &shared)
            };
            let rearm = if client.closing.load(Ordering::SeqCst) {
                None
            } else {
                rearm
            };
            // decrement before queueing the close so the reactor can
            // commit it on the first drain
            client.pending.fetch_sub(1, Ordering::SeqCst);
            match rearm {
                Some(mask) => {
                    if let Err(e) = shared.reactor.modify(client.fd, shared.conn_events | mask) {
                        debug!(fd = client.fd, error = %e, "rearm failed");
                        shared.close_queue.lock().unwrap().push(client.fd);
                        shared.waker.wake();
                    }
                }
                None => {
                    shared.close_queue.lock().unwrap().push(client.fd);
                    shared.waker.wake();
                }
            }
        });
    }

    /// Close `fd` now if no worker owns it, otherwise flag it and revisit
    /// after a short grace timer.
    fn try_close(&mut self, fd: RawFd, why: &str) {
        let Some(client) = self.table.get(&fd) else {
            return;
        };
        client.closing.store(true, Ordering::SeqCst);
        if client.pending.load(Ordering::SeqCst) > 0 {
            debug!(fd, why, "close deferred, worker in flight");
            self.timers.add(fd, Duration::from_millis(CLOSE_GRACE_MS));
            return;
        }
        self.close_conn(fd, why);
    }

    /// Commit a close: deregister, disarm, drop the table entry. The
    /// socket fd closes when the last `Arc` (possibly held briefly by a
    /// finishing worker) goes away.
    fn close_conn(&mut self, fd: RawFd, why: &str) {
        if let Some(_client) = self.table.remove(&fd) {
            let _ = self.shared.reactor.remove(fd);
            self.timers.remove(fd);
            debug!(fd, why, clients = self.table.len(), "connection closed");
        }
    }

    fn drain_close_queue(&mut self) {
        let fds: Vec<RawFd> = mem::take(&mut *self.shared.close_queue.lock().unwrap());
        for fd in fds {
            self.try_close(fd, "worker requested close");
        }
    }

    fn sweep_timers(&mut self) {
        let mut expired = Vec::new();
        self.timers.tick(|fd| expired.push(fd));
        for fd in expired {
            self.try_close(fd, "idle timeout");
        }
    }
}

/// Drain the socket and drive the parser. `None` asks for a close.
fn on_read(client: &ClientConn, shared: &Shared) -> Option<u32> {
    let mut conn = client.conn.lock().unwrap();
    match conn.read_to_buffer() {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!(fd = client.fd, "peer closed");
            return None;
        }
        Err(e) => {
            warn!(fd = client.fd, error = %e, "read failed");
            return None;
        }
    }
    match conn.process(&shared.ctx) {
        ProcessOutcome::WantRead => Some(reactor::READ),
        ProcessOutcome::WantWrite => Some(reactor::WRITE),
    }
}

/// Push response bytes out; on completion either reset for keep-alive or
/// ask for a close.
fn on_write(client: &ClientConn, shared: &Shared) -> Option<u32> {
    let mut conn = client.conn.lock().unwrap();
    if let Err(e) = conn.write_from_iov() {
        warn!(fd = client.fd, error = %e, "write failed");
        return None;
    }
    if !conn.write_done() {
        return Some(reactor::WRITE);
    }
    if !conn.keep_alive() {
        return None;
    }
    conn.reset_for_keep_alive();
    if conn.has_buffered_input() {
        // pipelined bytes may already hold the next request
        match conn.process(&shared.ctx) {
            ProcessOutcome::WantRead => Some(reactor::READ),
            ProcessOutcome::WantWrite => Some(reactor::WRITE),
        }
    } else {
        Some(reactor::READ)
    }
}

/// Best-effort back-pressure reply; the fd closes when `sock` drops.
fn send_busy(sock: &OwnedFd) {
    unsafe {
        libc::write(
            sock.as_raw_fd(),
            BUSY_PAYLOAD.as_ptr() as *const libc::c_void,
            BUSY_PAYLOAD.len(),
        )
    };
}
