//! Network layer: epoll reactor, listener setup, reactor wakeup
//!
//! Everything here is a thin, safe wrapper over raw libc calls. Failures
//! are wrapped in the layer's [`Error`]; transient conditions
//! (`WouldBlock`, `Interrupted`) stay visible through [`Error::kind`] so
//! callers can retry on the next readiness event.

pub mod reactor;
pub mod socket;
pub mod waker;

pub use reactor::{Event, Reactor};
pub use waker::Waker;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, Error>;

/// Network operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bind to port {port} failed: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },
}

impl Error {
    /// The underlying error kind, for `WouldBlock`/`Interrupted` checks.
    pub fn kind(&self) -> std::io::ErrorKind {
        match self {
            Error::Io(e) => e.kind(),
            Error::Bind { source, .. } => source.kind(),
        }
    }
}
