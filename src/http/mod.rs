//! HTTP/1.1 layer
//!
//! Incremental request parsing, response assembly and per-connection state.
//! The parser consumes bytes straight out of a connection's
//! [`ByteBuffer`](crate::buffer::ByteBuffer), so a request fragmented across
//! any number of TCP segments parses to the same result as one delivered
//! whole.

pub mod conn;
pub mod headers;
pub mod request;
pub mod response;

pub use conn::{HttpConn, ProcessOutcome, ServeContext};
pub use headers::Headers;
pub use request::{FeedOutcome, Method, RequestParser, Version};
pub use response::Response;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid percent-encoding digit: {0:#04x}")]
    InvalidHex(u8),
}

/// CRLF line ending
pub const CRLF: &str = "\r\n";
