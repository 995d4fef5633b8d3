//! Incremental HTTP request parsing
//!
//! [`RequestParser`] is a state machine fed from a connection's input
//! buffer. It consumes bytes only once a complete CRLF-terminated line (or,
//! in the body state, the declared `Content-Length`) is available, so
//! feeding a request in arbitrary fragments is equivalent to feeding it
//! whole.

use super::{Error, Headers, Result};
use crate::buffer::ByteBuffer;
use std::collections::HashMap;
use std::fmt;

/// Request methods the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    RequestLine,
    Headers,
    Body,
    Finished,
}

/// Outcome of one [`RequestParser::feed`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The buffer held no complete parse step; feed again after more bytes
    /// arrive.
    NeedMore,
    /// A full request has been parsed.
    Done,
}

/// Pages that resolve to `<name>.html` when requested without a suffix.
const DEFAULT_PAGES: [&str; 7] = [
    "/index",
    "/register",
    "/login",
    "/welcome",
    "/video",
    "/picture",
    "/favicon.ico",
];

/// Incremental request parser.
pub struct RequestParser {
    state: ParseState,
    method: Option<Method>,
    path: String,
    version: Option<Version>,
    headers: Headers,
    form: HashMap<String, String>,
    body: Vec<u8>,
    content_len: usize,
}

impl RequestParser {
    pub fn new() -> Self {
        RequestParser {
            state: ParseState::RequestLine,
            method: None,
            path: String::new(),
            version: None,
            headers: Headers::new(),
            form: HashMap::new(),
            body: Vec::new(),
            content_len: 0,
        }
    }

    /// Reset for the next request on a keep-alive connection.
    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.method = None;
        self.path.clear();
        self.version = None;
        self.headers.clear();
        self.form.clear();
        self.body.clear();
        self.content_len = 0;
    }

    /// Drive the state machine over whatever `buf` currently holds.
    pub fn feed(&mut self, buf: &mut ByteBuffer) -> Result<FeedOutcome> {
        loop {
            match self.state {
                ParseState::Finished => return Ok(FeedOutcome::Done),
                ParseState::Body => {
                    let need = self.content_len - self.body.len();
                    let take = need.min(buf.readable());
                    self.body.extend_from_slice(&buf.peek()[..take]);
                    buf.consume(take);
                    if self.body.len() < self.content_len {
                        return Ok(FeedOutcome::NeedMore);
                    }
                    self.finish_body()?;
                    self.state = ParseState::Finished;
                }
                ParseState::RequestLine | ParseState::Headers => {
                    let Some(pos) = find_crlf(buf.peek()) else {
                        return Ok(FeedOutcome::NeedMore);
                    };
                    let line = String::from_utf8_lossy(&buf.peek()[..pos]).into_owned();
                    buf.consume_until(pos + 2);
                    if self.state == ParseState::RequestLine {
                        self.parse_request_line(&line)?;
                        self.state = ParseState::Headers;
                    } else {
                        self.parse_header_or_finish(&line)?;
                    }
                }
            }
        }
    }

    fn parse_request_line(&mut self, line: &str) -> Result<()> {
        let mut parts = line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Parse(format!("malformed request line: {}", line)));
        };
        self.method = Some(Method::from_str(method)?);
        self.version = Some(Version::from_str(version)?);
        self.path = target.to_string();
        self.normalize_path();
        tracing::debug!(method, path = %self.path, version, "request line");
        Ok(())
    }

    fn parse_header_or_finish(&mut self, line: &str) -> Result<()> {
        if line.is_empty() {
            match self.headers.get("Content-Length") {
                Some(v) => {
                    self.content_len = v
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| Error::Parse(format!("invalid Content-Length: {}", v)))?;
                    self.state = if self.content_len == 0 {
                        ParseState::Finished
                    } else {
                        ParseState::Body
                    };
                }
                None => self.state = ParseState::Finished,
            }
            return Ok(());
        }
        let (name, value) = Headers::parse_header_line(line)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// `/` becomes `/index.html`; a trailing segment out of the known page
    /// set gets its `.html` suffix appended.
    fn normalize_path(&mut self) {
        if self.path == "/" {
            self.path = "/index.html".to_string();
            return;
        }
        let last = match self.path.rfind('/') {
            Some(i) => &self.path[i..],
            None => return,
        };
        if DEFAULT_PAGES.contains(&last) {
            self.path.push_str(".html");
        }
    }

    fn finish_body(&mut self) -> Result<()> {
        if self.method == Some(Method::Post)
            && self.headers.get("Content-Type") == Some("application/x-www-form-urlencoded")
        {
            parse_urlencoded(&self.body, &mut self.form)?;
        }
        Ok(())
    }

    /// keep-alive iff the request is HTTP/1.1 and asked for it explicitly.
    pub fn keep_alive(&self) -> bool {
        self.version == Some(Version::Http11)
            && self.headers.get("Connection") == Some("keep-alive")
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParseState::Finished
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rewrite the target path (used by the auth flow).
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn form(&self, key: &str) -> Option<&str> {
        self.form.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Decode an `application/x-www-form-urlencoded` body into `form`.
///
/// `+` decodes to space, `%HH` to the byte `16*hi + lo`; `=` closes a key
/// segment and `&` flushes a pair. A trailing segment without `=` is a key
/// with an empty value.
fn parse_urlencoded(body: &[u8], form: &mut HashMap<String, String>) -> Result<()> {
    if body.is_empty() {
        return Ok(());
    }
    let mut key: Option<String> = None;
    let mut seg: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            b'=' => {
                key = Some(String::from_utf8_lossy(&seg).into_owned());
                seg.clear();
            }
            b'&' => {
                let k = key.take().unwrap_or_default();
                form.insert(k, String::from_utf8_lossy(&seg).into_owned());
                seg.clear();
            }
            b'+' => seg.push(b' '),
            b'%' => {
                if i + 2 >= body.len() {
                    return Err(Error::Parse("truncated percent-encoding".to_string()));
                }
                let hi = hex_digit(body[i + 1])?;
                let lo = hex_digit(body[i + 2])?;
                seg.push(16 * hi + lo);
                i += 2;
            }
            c => seg.push(c),
        }
        i += 1;
    }
    match key.take() {
        Some(k) => {
            form.insert(k, String::from_utf8_lossy(&seg).into_owned());
        }
        None => {
            if !seg.is_empty() {
                form.insert(String::from_utf8_lossy(&seg).into_owned(), String::new());
            }
        }
    }
    Ok(())
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::InvalidHex(b)),
    }
}
