//! Minimal non-blocking HTTP/1.1 server exposing network snapshots.
//!
//! Serves `GET /data` as a JSON object of every registered model keyed by
//! name, and static files from an optional site directory. The embedder
//! pumps it from its own loop; nothing here blocks.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;

use crate::network::Network;
use crate::viz::NetworkSnapshot;

const HEADER_END: &[u8] = b"\r\n\r\n";
const MAX_REQUEST_SIZE: usize = 8 * 1024;

pub struct VisualizationServer {
    addr: SocketAddr,
    site_dir: Option<PathBuf>,
    listener: Option<TcpListener>,
    clients: Vec<HttpClient>,
}

struct HttpClient {
    stream: TcpStream,
    request: Vec<u8>,
}

impl VisualizationServer {
    pub fn new(addr: SocketAddr, site_dir: Option<PathBuf>) -> Self {
        Self { addr, site_dir, listener: None, clients: Vec::new() }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept and answer pending requests against the given models. Call
    /// once per embedder loop iteration.
    pub fn update(&mut self, networks: &[(&str, &Network)]) {
        if self.listener.is_none() {
            match TcpListener::bind(self.addr) {
                Ok(listener) => {
                    if listener.set_nonblocking(true).is_ok() {
                        log::info!("visualization listening on {}", self.addr);
                        self.listener = Some(listener);
                    }
                }
                Err(err) => {
                    log::debug!("visualization bind {} failed: {}", self.addr, err);
                    return;
                }
            }
        }

        if let Some(listener) = &self.listener {
            loop {
                match listener.accept() {
                    Ok((stream, _peer)) => {
                        if stream.set_nonblocking(true).is_ok() {
                            self.clients.push(HttpClient { stream, request: Vec::new() });
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(err) => {
                        log::debug!("visualization accept failed: {}", err);
                        break;
                    }
                }
            }
        }

        let mut remaining = Vec::new();
        for mut client in self.clients.drain(..) {
            match client.pump() {
                RequestProgress::Complete(path) => {
                    let response = answer(&path, networks, self.site_dir.as_deref());
                    let _ = client.stream.write_all(&response);
                    let _ = client.stream.flush();
                }
                RequestProgress::Pending => remaining.push(client),
                RequestProgress::Failed => {}
            }
        }
        self.clients = remaining;
    }
}

enum RequestProgress {
    Complete(String),
    Pending,
    Failed,
}

impl HttpClient {
    fn pump(&mut self) -> RequestProgress {
        let mut chunk = [0u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return RequestProgress::Failed,
                Ok(n) => {
                    self.request.extend_from_slice(&chunk[..n]);
                    if self.request.len() > MAX_REQUEST_SIZE {
                        return RequestProgress::Failed;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(_) => return RequestProgress::Failed,
            }
        }

        if !self
            .request
            .windows(HEADER_END.len())
            .any(|window| window == HEADER_END)
        {
            return RequestProgress::Pending;
        }

        match parse_request_path(&self.request) {
            Some(path) => RequestProgress::Complete(path),
            None => RequestProgress::Failed,
        }
    }
}

fn parse_request_path(request: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(request);
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();

    let method = parts.next()?;
    if method != "GET" {
        return None;
    }

    let path = parts.next()?;
    let path = path.split('?').next().unwrap_or(path);
    Some(path.to_string())
}

fn answer(path: &str, networks: &[(&str, &Network)], site_dir: Option<&std::path::Path>) -> Vec<u8> {
    if path == "/data" {
        let mut map = serde_json::Map::new();
        for (name, network) in networks {
            let snapshot = NetworkSnapshot::of(network);
            match serde_json::to_value(&snapshot) {
                Ok(value) => {
                    map.insert((*name).to_string(), value);
                }
                Err(err) => log::warn!("snapshot of '{}' failed to serialize: {}", name, err),
            }
        }

        let body = serde_json::Value::Object(map).to_string();
        return build_response("200 OK", "application/json", body.as_bytes());
    }

    let relative = if path == "/" { "index.html" } else { path.trim_start_matches('/') };

    // No path traversal out of the site directory.
    if relative.split('/').any(|segment| segment == "..") {
        return build_response("404 NOT FOUND", "text/plain", b"");
    }

    if let Some(site_dir) = site_dir {
        let full_path = site_dir.join(relative);
        if let Ok(body) = std::fs::read(&full_path) {
            return build_response("200 OK", mime_type(relative), &body);
        }
    }

    build_response("404 NOT FOUND", "text/plain", b"")
}

fn mime_type(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("ico") => "image/x-icon",
        _ => "text/plain",
    }
}

fn build_response(status: &str, mime: &str, body: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(body.len() + 128);
    response.extend_from_slice(format!("HTTP/1.1 {}\r\n", status).as_bytes());
    response.extend_from_slice(format!("Content-Type: {}\r\n", mime).as_bytes());
    response.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    response.extend_from_slice(b"Connection: close\r\n\r\n");
    response.extend_from_slice(body);
    response
}
