//! HTTP headers handling
//!
//! Headers are kept in insertion order with case-insensitive name lookups.
//! A repeated header name overwrites the earlier value in place, which is
//! the behavior the request parser wants for `Content-Length` and
//! `Connection`.

use super::{Error, Result};
use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Insert a header. An existing header with the same name
    /// (case-insensitive) is overwritten; the original spelling of the name
    /// is kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Look up a header value (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.len() != before
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn clear(&mut self) {
        self.headers.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a `KEY ":" OWS VALUE` line, where OWS is one optional space.
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let Some(colon) = line.find(':') else {
            return Err(Error::InvalidHeader(format!("no colon in header: {}", line)));
        };
        let name = &line[..colon];
        if name.is_empty() {
            return Err(Error::InvalidHeader("empty header name".to_string()));
        }
        let value = line[colon + 1..].strip_prefix(' ').unwrap_or(&line[colon + 1..]);
        Ok((name.to_string(), value.to_string()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}
