//! Response assembly
//!
//! Builds the status line and headers into the connection's output buffer
//! and memory-maps the file body read-only. The mapping is owned by the
//! [`FileMap`] handle; dropping it (connection teardown or keep-alive
//! reset) unmaps.

use crate::buffer::ByteBuffer;
use bytes::Bytes;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

/// Read-only private mapping of a served file.
#[derive(Debug)]
pub struct FileMap {
    ptr: *mut libc::c_void,
    len: usize,
}

impl FileMap {
    pub fn map(file: &File, len: usize) -> io::Result<FileMap> {
        if len == 0 {
            return Ok(FileMap {
                ptr: std::ptr::null_mut(),
                len: 0,
            });
        }
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(FileMap { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for FileMap {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { libc::munmap(self.ptr, self.len) };
        }
    }
}

// The mapping is immutable and file-backed; handing the handle from the
// reactor thread to a worker is sound.
unsafe impl Send for FileMap {}

/// Response state for one request/response exchange.
#[derive(Debug)]
pub struct Response {
    code: Option<u16>,
    doc_root: PathBuf,
    path: String,
    keep_alive: bool,
    map: Option<FileMap>,
}

impl Response {
    /// `code` is `None` when the parser succeeded and resolution should
    /// decide; a preset code (400 from a parse failure, 500 from a
    /// dispatcher) short-circuits to the matching error page.
    pub fn new(
        doc_root: impl Into<PathBuf>,
        path: impl Into<String>,
        keep_alive: bool,
        code: Option<u16>,
    ) -> Self {
        Response {
            code,
            doc_root: doc_root.into(),
            path: path.into(),
            keep_alive,
            map: None,
        }
    }

    /// Resolve the target, then emit status line + headers (and, for the
    /// error fallback, an inline body) into `buf`. A successfully mapped
    /// file body is exposed through [`file`](Self::file) for the
    /// connection's second iovec.
    pub fn build(&mut self, buf: &mut ByteBuffer) {
        self.map = None;
        // a code preset by a parse failure or the dispatcher wins over
        // target resolution and goes straight to the error-page remap
        if self.code.is_none() {
            self.code = Some(match std::fs::metadata(self.target()) {
                Err(_) => 404,
                Ok(meta) if meta.is_dir() => 404,
                Ok(meta) if meta.mode() & 0o004 == 0 => 403,
                Ok(_) => 200,
            });
        }
        self.rewrite_to_error_page();

        let code = self.normalized_code();
        buf.append(format!("HTTP/1.1 {} {}\r\n", code, reason(code)).as_bytes());
        if self.keep_alive {
            buf.append(b"Connection: keep-alive\r\n");
            buf.append(b"Keep-Alive: max=6, timeout=120\r\n");
        } else {
            buf.append(b"Connection: close\r\n");
        }

        match self.open_and_map() {
            Ok((map, len)) => {
                buf.append(format!("Content-Type: {}\r\n", mime_type(&self.path)).as_bytes());
                buf.append(format!("Content-Length: {}\r\n\r\n", len).as_bytes());
                self.map = Some(map);
            }
            Err(err) => {
                tracing::debug!(path = %self.path, error = %err, "serving inline error page");
                self.error_content(buf, "File Not Found!");
            }
        }
    }

    /// The mapped file body, empty when the response carries an inline
    /// body instead.
    pub fn file(&self) -> &[u8] {
        self.map.as_ref().map(FileMap::as_slice).unwrap_or(&[])
    }

    /// Release the mapping without waiting for drop.
    pub fn unmap(&mut self) {
        self.map = None;
    }

    pub fn code(&self) -> Option<u16> {
        self.code
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append the generated error snippet (with its own length and type
    /// headers) when no file could be served.
    pub fn error_content(&self, buf: &mut ByteBuffer, message: &str) {
        let code = self.normalized_code();
        let body = error_page(code, message);
        buf.append(b"Content-Type: text/html\r\n");
        buf.append(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        buf.append(&body);
    }

    fn target(&self) -> PathBuf {
        self.doc_root.join(self.path.trim_start_matches('/'))
    }

    /// `{400, 403, 404, 500}` are served from their page under the
    /// document root when present.
    fn rewrite_to_error_page(&mut self) {
        let page = match self.code {
            Some(400) => "/400.html",
            Some(403) => "/403.html",
            Some(404) => "/404.html",
            Some(500) => "/500.html",
            _ => return,
        };
        self.path = page.to_string();
        if std::fs::metadata(self.target()).is_err() {
            self.code = Some(404);
        }
    }

    fn open_and_map(&self) -> io::Result<(FileMap, u64)> {
        let file = File::open(self.target())?;
        let len = file.metadata()?.len();
        let map = FileMap::map(&file, len as usize)?;
        Ok((map, len))
    }

    fn normalized_code(&self) -> u16 {
        match self.code {
            Some(c @ (200 | 400 | 403 | 404 | 500)) => c,
            _ => 400,
        }
    }
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Bad Request",
    }
}

fn error_page(code: u16, message: &str) -> Bytes {
    let mut body = String::new();
    body.push_str("<html><title>Error</title>");
    body.push_str("<body bgcolor=\"ffffff\">");
    body.push_str(&format!("{} : {}\n", code, reason(code)));
    body.push_str(&format!("<p>{}</p>", message));
    body.push_str("<hr><em>surge</em></body></html>");
    Bytes::from(body)
}

/// Content type by file suffix, `text/plain` when unknown.
fn mime_type(path: &str) -> &'static str {
    let suffix = match path.rfind('.') {
        Some(i) => &path[i..],
        None => return "text/plain",
    };
    match suffix {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/msword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" => "image/jpeg",
        ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" => "video/mpeg",
        ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("surge-resp-{}-{}", std::process::id(), tag));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn write_file(root: &Path, name: &str, content: &[u8]) {
        let mut f = File::create(root.join(name)).unwrap();
        f.write_all(content).unwrap();
    }

    fn build_to_string(resp: &mut Response) -> String {
        let mut buf = ByteBuffer::new();
        resp.build(&mut buf);
        String::from_utf8_lossy(buf.peek()).into_owned()
    }

    #[test]
    fn test_serves_existing_file() {
        let root = temp_root("ok");
        write_file(&root, "index.html", b"<h1>hi</h1>");

        let mut resp = Response::new(&root, "/index.html", true, None);
        let head = build_to_string(&mut resp);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert!(head.contains("Keep-Alive: max=6, timeout=120\r\n"));
        assert!(head.contains("Content-Type: text/html\r\n"));
        assert!(head.contains("Content-Length: 11\r\n"));
        assert_eq!(resp.file(), b"<h1>hi</h1>");
    }

    #[test]
    fn test_missing_file_without_error_page() {
        let root = temp_root("missing");
        let mut resp = Response::new(&root, "/nope.html", false, None);
        let head = build_to_string(&mut resp);
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        // inline error body
        assert!(head.contains("<html><title>Error</title>"));
        assert!(head.contains("404 : Not Found"));
        assert!(resp.file().is_empty());
    }

    #[test]
    fn test_missing_file_with_error_page() {
        let root = temp_root("errpage");
        write_file(&root, "404.html", b"custom not found");
        let mut resp = Response::new(&root, "/nope.html", false, None);
        let head = build_to_string(&mut resp);
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("Content-Length: 16\r\n"));
        assert_eq!(resp.file(), b"custom not found");
    }

    #[test]
    fn test_directory_target_is_404() {
        let root = temp_root("dir");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        let mut resp = Response::new(&root, "/sub", false, None);
        let head = build_to_string(&mut resp);
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn test_unreadable_file_is_403() {
        use std::os::unix::fs::PermissionsExt;
        let root = temp_root("perm");
        write_file(&root, "403.html", b"forbidden page");
        write_file(&root, "secret.html", b"hidden");
        std::fs::set_permissions(
            root.join("secret.html"),
            std::fs::Permissions::from_mode(0o600),
        )
        .unwrap();

        let mut resp = Response::new(&root, "/secret.html", false, None);
        let head = build_to_string(&mut resp);
        assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{}", head);
        assert_eq!(resp.file(), b"forbidden page");
    }

    #[test]
    fn test_preset_400_served_from_its_error_page() {
        let root = temp_root("preset");
        write_file(&root, "400.html", b"bad request page");
        let mut resp = Response::new(&root, "/anything", false, Some(400));
        let head = build_to_string(&mut resp);
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(resp.file(), b"bad request page");
    }

    #[test]
    fn test_preset_400_without_error_page_becomes_404_inline() {
        let root = temp_root("preset404");
        let mut resp = Response::new(&root, "/anything", false, Some(400));
        let head = build_to_string(&mut resp);
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("404 : Not Found"));
    }

    #[test]
    fn test_preset_code_unknown_normalizes_to_400() {
        let root = temp_root("unknown");
        write_file(&root, "index.html", b"x");
        let mut resp = Response::new(&root, "/index.html", false, Some(999));
        let head = build_to_string(&mut resp);
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_type("/a.html"), "text/html");
        assert_eq!(mime_type("/a.jpg"), "image/jpeg");
        assert_eq!(mime_type("/a.css"), "text/css");
        assert_eq!(mime_type("/a.js"), "text/javascript");
        assert_eq!(mime_type("/a.weird"), "text/plain");
        assert_eq!(mime_type("/noext"), "text/plain");
    }

    #[test]
    fn test_filemap_empty_file() {
        let root = temp_root("empty");
        write_file(&root, "empty.html", b"");
        let file = File::open(root.join("empty.html")).unwrap();
        let map = FileMap::map(&file, 0).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.as_slice(), b"");
    }
}
