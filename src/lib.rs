//! Surge - single-node HTTP/1.1 serving engine
//!
//! This crate implements an HTTP/1.1 server built on an edge/level-triggered
//! epoll reactor. Connections are accepted on a non-blocking listener,
//! requests are parsed incrementally from per-connection byte buffers, and
//! the socket work runs on a fixed worker pool while the reactor thread owns
//! the connection table and the idle-timeout heap.
//!
//! # Architecture
//!
//! - [`buffer::ByteBuffer`] absorbs TCP bursts with a scatter read and
//!   drains responses with plain writes.
//! - [`net::Reactor`] wraps epoll(7); client sockets are registered
//!   one-shot so at most one worker at a time touches a connection.
//! - [`timer::TimerHeap`] reclaims idle connections; its earliest deadline
//!   doubles as the reactor's wait timeout.
//! - [`http`] holds the request parser, response assembly (static files are
//!   memory-mapped), and the per-connection state machine.
//! - [`pool`] provides the fixed-size blocking pool behind the form
//!   authentication flow.
//! - [`server::Server`] ties the pieces together and runs the main loop.
//!
//! # Example
//!
//! ```no_run
//! use surge::server::{Server, ServerConfig};
//!
//! let config = ServerConfig {
//!     port: 8080,
//!     doc_root: "/var/www".into(),
//!     ..ServerConfig::default()
//! };
//! let mut server = Server::new(config, None).unwrap();
//! server.run().unwrap();
//! ```

pub mod buffer;
pub mod http;
pub mod net;
pub mod pool;
pub mod server;
pub mod timer;

pub use buffer::ByteBuffer;
pub use server::{Server, ServerConfig, ServerHandle};
