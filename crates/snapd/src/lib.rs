//! # snapd
//!
//! Minimal client for the snapd REST API.
//!
//! snapd listens on a unix domain socket (`/run/snapd.socket`) and
//! speaks plain HTTP/1.1, so the transport here is a short hand-written
//! request/response exchange over a [`UnixStream`]. Only the two
//! endpoints this project needs are implemented: querying an installed
//! snap and finding a snap in the store.
//!
//! See <https://snapcraft.io/docs/snapd-rest-api> for the API shape.

pub mod error;

pub use error::{Error, Result};

use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

/// Default path of the snapd control socket.
pub const DEFAULT_SOCKET: &str = "/run/snapd.socket";

/// Status string snapd reports for an active snap installation.
pub const STATUS_ACTIVE: &str = "active";

/// Information about a snap, as reported by the snapd API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snap {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default, rename = "tracking-channel")]
    pub tracking_channel: String,
    #[serde(default)]
    pub confinement: String,
    #[serde(default)]
    pub channels: HashMap<String, ChannelInfo>,
}

/// Channel-specific information for a snap.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelInfo {
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub confinement: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub channel: String,
}

/// Common envelope of snapd API responses.
#[derive(Debug, Deserialize)]
struct Envelope {
    result: serde_json::Value,
}

/// Client for the snapd REST API.
pub struct Client {
    socket_path: PathBuf,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a client against the default socket path.
    pub fn new() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET),
        }
    }

    /// Create a client against a custom socket path (useful for testing).
    pub fn with_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Path of the socket this client talks to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Query information about an installed snap (`GET /v2/snaps/{name}`).
    pub fn snap(&self, name: &str) -> Result<Snap> {
        let response = self.get(&format!("/v2/snaps/{name}"))?;

        match response.status {
            200 => {
                let envelope: Envelope = serde_json::from_slice(&response.body)?;
                let snap: Snap = serde_json::from_value(envelope.result)?;
                Ok(snap)
            }
            404 => Err(Error::NotInstalled(name.to_string())),
            code => Err(Error::Status(code)),
        }
    }

    /// Search for a snap in the store (`GET /v2/find?name={name}`).
    ///
    /// Returns the first match; an empty result set is treated the same
    /// as a 404.
    pub fn find_one(&self, name: &str) -> Result<Snap> {
        let response = self.get(&format!("/v2/find?name={name}"))?;

        match response.status {
            200 => {
                let envelope: Envelope = serde_json::from_slice(&response.body)?;
                let mut snaps: Vec<Snap> = serde_json::from_value(envelope.result)?;
                if snaps.is_empty() {
                    return Err(Error::NotFound(name.to_string()));
                }
                Ok(snaps.remove(0))
            }
            404 => Err(Error::NotFound(name.to_string())),
            code => Err(Error::Status(code)),
        }
    }

    fn get(&self, path: &str) -> Result<HttpResponse> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(std::time::Duration::from_secs(60)))?;

        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes())?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;

        parse_response(&raw)
    }
}

struct HttpResponse {
    status: u16,
    body: Vec<u8>,
}

/// Parse a raw HTTP/1.1 response into a status code and body, honouring
/// both `Content-Length` and chunked transfer encoding.
fn parse_response(raw: &[u8]) -> Result<HttpResponse> {
    let split = find_header_end(raw)
        .ok_or_else(|| Error::Protocol("missing end of headers".to_string()))?;
    let (head, body) = raw.split_at(split);
    let body = &body[4..]; // skip the CRLFCRLF separator

    let head = String::from_utf8_lossy(head);
    let mut lines = head.lines();

    let status_line = lines
        .next()
        .ok_or_else(|| Error::Protocol("missing status line".to_string()))?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::Protocol(format!("bad status line: {status_line}")))?;

    let mut chunked = false;
    let mut content_length: Option<usize> = None;
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value.eq_ignore_ascii_case("chunked");
        } else if key.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().ok();
        }
    }

    let body = if chunked {
        dechunk(body)?
    } else {
        match content_length {
            Some(n) if n <= body.len() => body[..n].to_vec(),
            // Connection: close and no length header; the body is
            // everything up to EOF.
            _ => body.to_vec(),
        }
    };

    Ok(HttpResponse { status, body })
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn dechunk(mut body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    loop {
        let line_end = find_crlf(body)
            .ok_or_else(|| Error::Protocol("truncated chunk header".to_string()))?;
        let size_str = String::from_utf8_lossy(&body[..line_end]);
        let size = usize::from_str_radix(size_str.trim(), 16)
            .map_err(|_| Error::Protocol(format!("bad chunk size: {size_str}")))?;

        body = &body[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if body.len() < size + 2 {
            return Err(Error::Protocol("truncated chunk body".to_string()));
        }

        out.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}

fn find_crlf(raw: &[u8]) -> Option<usize> {
    raw.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::net::UnixListener;

    fn serve_once(dir: &Path, response: &'static str) -> PathBuf {
        let socket = dir.join("snapd.socket");
        let listener = UnixListener::bind(&socket).unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = std::io::Read::read(&mut stream, &mut buf).unwrap();
            stream.write_all(response.as_bytes()).unwrap();
        });
        socket
    }

    #[test]
    fn parse_content_length_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"{}");
    }

    #[test]
    fn parse_chunked_response() {
        let raw =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n{\"a\r\n2\r\n\":\r\n3\r\n1}\n\r\n0\r\n\r\n";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"{\"a\":1}\n");
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(parse_response(b"not http at all").is_err());
    }

    #[test]
    fn snap_query_decodes_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"type":"sync","status":"OK","result":{"id":"abc","name":"juju","status":"active","version":"3.6.1","channel":"3.6/stable","tracking-channel":"3.6/stable","confinement":"strict"}}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let socket = serve_once(dir.path(), response);

        let client = Client::with_socket(&socket);
        let snap = client.snap("juju").unwrap();
        assert_eq!(snap.name, "juju");
        assert_eq!(snap.status, STATUS_ACTIVE);
        assert_eq!(snap.tracking_channel, "3.6/stable");
    }

    #[test]
    fn snap_query_missing_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let socket = serve_once(
            dir.path(),
            "HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\n\r\n{}",
        );

        let client = Client::with_socket(&socket);
        let err = client.snap("missing").unwrap_err();
        assert!(matches!(err, Error::NotInstalled(_)));
        assert!(err.is_terminal());
    }

    #[test]
    fn find_empty_result_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"type":"sync","status":"OK","result":[]}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let socket = serve_once(dir.path(), response);

        let client = Client::with_socket(&socket);
        let err = client.find_one("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn find_returns_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"type":"sync","status":"OK","result":[{"name":"microk8s","confinement":"strict","channels":{"1.32-strict/stable":{"confinement":"strict"},"1.32/stable":{"confinement":"classic"}}}]}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let socket = serve_once(dir.path(), response);

        let client = Client::with_socket(&socket);
        let snap = client.find_one("microk8s").unwrap();
        assert_eq!(snap.name, "microk8s");
        assert_eq!(snap.channels.len(), 2);
        assert_eq!(
            snap.channels["1.32-strict/stable"].confinement,
            "strict"
        );
    }

    #[test]
    fn socket_unreachable_is_transient() {
        let client = Client::with_socket("/nonexistent/snapd.socket");
        let err = client.snap("juju").unwrap_err();
        assert!(matches!(err, Error::Socket(_)));
        assert!(!err.is_terminal());
    }
}
