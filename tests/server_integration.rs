//! Integration tests for the serving engine
//!
//! Each test boots a real server on an ephemeral port with a throwaway
//! document root and talks to it over plain `TcpStream`s.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use surge::pool::{AuthService, MemoryStore, Pool};
use surge::server::{Server, ServerConfig, ServerHandle};

const INDEX_BODY: &[u8] = b"<html><body>index page</body></html>";
const WELCOME_BODY: &[u8] = b"<html><body>welcome</body></html>";
const ERROR_BODY: &[u8] = b"<html><body>bad credentials</body></html>";
const NOT_FOUND_BODY: &[u8] = b"<html><body>custom 404</body></html>";
const BAD_REQUEST_BODY: &[u8] = b"<html><body>custom 400</body></html>";

fn make_doc_root(tag: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("surge-it-{}-{}", std::process::id(), tag));
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("index.html"), INDEX_BODY).unwrap();
    fs::write(root.join("welcome.html"), WELCOME_BODY).unwrap();
    fs::write(root.join("error.html"), ERROR_BODY).unwrap();
    fs::write(root.join("404.html"), NOT_FOUND_BODY).unwrap();
    fs::write(root.join("400.html"), BAD_REQUEST_BODY).unwrap();
    root
}

struct TestServer {
    port: u16,
    handle: ServerHandle,
    thread: Option<thread::JoinHandle<()>>,
}

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .init();
    });
}

impl TestServer {
    fn start(config: ServerConfig, users: Option<Vec<(&str, &str)>>) -> TestServer {
        init_tracing();
        let auth = users.map(|users| {
            let store = MemoryStore::with_users(users);
            Arc::new(AuthService::new(Pool::new(vec![store]))) as Arc<dyn surge::pool::AuthHook>
        });
        let mut server = Server::new(config, auth).unwrap();
        let port = server.port();
        let handle = server.handle();
        let thread = thread::spawn(move || {
            server.run().unwrap();
        });
        TestServer {
            port,
            handle,
            thread: Some(thread),
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(t) = self.thread.take() {
            t.join().unwrap();
        }
    }
}

/// Read one response: status code, lowercased header map, exact
/// Content-Length body.
fn read_response(stream: &mut TcpStream) -> (u16, HashMap<String, String>, Vec<u8>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert_ne!(n, 0, "connection closed mid-header");
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let code: u16 = status_line.split(' ').nth(1).unwrap().parse().unwrap();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.to_ascii_lowercase(), v.trim_start().to_string());
        }
    }
    let len: usize = headers
        .get("content-length")
        .expect("response missing Content-Length")
        .parse()
        .unwrap();
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).unwrap();
    (code, headers, body)
}

#[test]
fn test_get_root_keep_alive() {
    let config = ServerConfig {
        port: 0,
        doc_root: make_doc_root("root"),
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None);
    let mut stream = server.connect();

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let (code, headers, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    assert_eq!(headers["connection"], "keep-alive");
    assert_eq!(headers["content-type"], "text/html");
    assert_eq!(body, INDEX_BODY);

    // the connection survives for a second exchange
    stream
        .write_all(b"GET /index HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let (code, _, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    assert_eq!(body, INDEX_BODY);
}

#[test]
fn test_missing_page_served_from_404_page() {
    let config = ServerConfig {
        port: 0,
        doc_root: make_doc_root("missing"),
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None);
    let mut stream = server.connect();

    stream
        .write_all(b"GET /missing.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let (code, headers, body) = read_response(&mut stream);
    assert_eq!(code, 404);
    assert_eq!(headers["connection"], "close");
    assert_eq!(body, NOT_FOUND_BODY);

    // close-mode connection ends after the response
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn test_missing_page_without_404_page_inlines_error() {
    let root = std::env::temp_dir().join(format!("surge-it-{}-bare", std::process::id()));
    fs::create_dir_all(&root).unwrap();
    let config = ServerConfig {
        port: 0,
        doc_root: root,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None);
    let mut stream = server.connect();

    stream
        .write_all(b"GET /missing.html HTTP/1.0\r\n\r\n")
        .unwrap();
    let (code, _, body) = read_response(&mut stream);
    assert_eq!(code, 404);
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("<html><title>Error</title>"));
    assert!(body.contains("404 : Not Found"));
}

#[test]
fn test_login_flow() {
    let config = ServerConfig {
        port: 0,
        doc_root: make_doc_root("login"),
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, Some(vec![("alice", "secret")]));

    // right password lands on the welcome page
    let mut stream = server.connect();
    let body = "username=alice&password=secret";
    stream
        .write_all(
            format!(
                "POST /login.html HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            )
            .as_bytes(),
        )
        .unwrap();
    let (code, _, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    assert_eq!(body, WELCOME_BODY);

    // wrong password lands on the error page
    let mut stream = server.connect();
    let body = "username=alice&password=nope";
    stream
        .write_all(
            format!(
                "POST /login.html HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            )
            .as_bytes(),
        )
        .unwrap();
    let (code, _, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    assert_eq!(body, ERROR_BODY);
}

#[test]
fn test_register_then_duplicate() {
    let config = ServerConfig {
        port: 0,
        doc_root: make_doc_root("register"),
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, Some(vec![]));

    let form = "username=bob&password=hunter2";
    let request = format!(
        "POST /register.html HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        form.len(),
        form
    );

    let mut stream = server.connect();
    stream.write_all(request.as_bytes()).unwrap();
    let (code, _, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    assert_eq!(body, WELCOME_BODY);

    // the same registration again is rejected
    let mut stream = server.connect();
    stream.write_all(request.as_bytes()).unwrap();
    let (code, _, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    assert_eq!(body, ERROR_BODY);
}

#[test]
fn test_split_request_delivery() {
    let config = ServerConfig {
        port: 0,
        doc_root: make_doc_root("split"),
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None);
    let mut stream = server.connect();

    stream.write_all(b"GE").unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"T / HTTP/1.1\r\n\r\n").unwrap();

    let (code, headers, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    assert_eq!(headers["connection"], "close");
    assert_eq!(body, INDEX_BODY);

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn test_bad_request_gets_400() {
    let config = ServerConfig {
        port: 0,
        doc_root: make_doc_root("bad"),
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None);
    let mut stream = server.connect();

    stream
        .write_all(b"BREW /pot HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let (code, headers, body) = read_response(&mut stream);
    assert_eq!(code, 400);
    assert_eq!(headers["connection"], "close");
    assert_eq!(body, BAD_REQUEST_BODY);
}

#[test]
fn test_idle_connection_is_reclaimed() {
    let config = ServerConfig {
        port: 0,
        doc_root: make_doc_root("idle"),
        timeout_ms: 200,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None);
    let mut stream = server.connect();

    // send nothing; the timer should close us well within the read timeout
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(n, 0, "expected EOF from idle reclamation");
}

#[test]
fn test_activity_extends_idle_timer() {
    let config = ServerConfig {
        port: 0,
        doc_root: make_doc_root("extend"),
        timeout_ms: 400,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None);
    let mut stream = server.connect();

    // keep trickling bytes of a request at < timeout intervals
    for chunk in [&b"GET / HT"[..], b"TP/1.1\r\n", b"Host: x\r\n"] {
        stream.write_all(chunk).unwrap();
        thread::sleep(Duration::from_millis(250));
    }
    stream.write_all(b"Connection: keep-alive\r\n\r\n").unwrap();
    let (code, _, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    assert_eq!(body, INDEX_BODY);
}

#[test]
fn test_back_pressure_refuses_with_busy() {
    let config = ServerConfig {
        port: 0,
        doc_root: make_doc_root("busy"),
        max_fds: 0,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None);
    let mut stream = server.connect();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, b"Server busy!");
}

#[test]
fn test_large_file_is_served_whole() {
    let root = make_doc_root("large");
    let payload: Vec<u8> = (0..200 * 1024).map(|i| (i % 251) as u8).collect();
    fs::write(root.join("blob.bin"), &payload).unwrap();

    let config = ServerConfig {
        port: 0,
        doc_root: root,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config, None);
    let mut stream = server.connect();

    stream
        .write_all(b"GET /blob.bin HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let (code, headers, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    assert_eq!(headers["content-type"], "text/plain");
    assert_eq!(body.len(), payload.len());
    assert_eq!(body, payload);
}
