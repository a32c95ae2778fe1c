//! Non-blocking TCP transport. One end listens and accepts a single peer,
//! the other dials.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

const DIAL_TIMEOUT_MS: u64 = 250;
const RX_CHUNK: usize = 1024;

enum TcpMode {
    Dial,
    Listen,
}

/// A `Connection` over a TCP socket.
///
/// Incoming bytes are pumped into an internal buffer on every poll so that
/// `available` reflects what a `read` can actually return. A peer hangup is
/// treated as an empty stream until the dead-route timeout tears the route
/// down.
pub struct TcpConnection {
    mode: TcpMode,
    addr: SocketAddr,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    rx: VecDeque<u8>,
}

impl TcpConnection {
    /// Actively connect to `addr` on `open`.
    pub fn dial(addr: SocketAddr) -> Self {
        Self { mode: TcpMode::Dial, addr, listener: None, stream: None, rx: VecDeque::new() }
    }

    /// Bind `addr` and accept a single peer on `open`.
    pub fn listen(addr: SocketAddr) -> Self {
        Self { mode: TcpMode::Listen, addr, listener: None, stream: None, rx: VecDeque::new() }
    }

    /// "host:port" string for route info displays.
    pub fn info(&self) -> String {
        self.addr.to_string()
    }

    fn pump(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut chunk = [0u8; RX_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    // Orderly hangup. Keep buffered bytes readable.
                    self.stream = None;
                    break;
                }
                Ok(n) => self.rx.extend(chunk[..n].iter().copied()),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::debug!("tcp {}: read error: {}", self.addr, err);
                    self.stream = None;
                    break;
                }
            }
        }
    }
}

impl super::Connection for TcpConnection {
    fn open(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }

        let stream = match self.mode {
            TcpMode::Dial => {
                match TcpStream::connect_timeout(&self.addr, Duration::from_millis(DIAL_TIMEOUT_MS))
                {
                    Ok(stream) => stream,
                    Err(err) => {
                        log::trace!("tcp {}: dial failed: {}", self.addr, err);
                        return false;
                    }
                }
            }
            TcpMode::Listen => {
                if self.listener.is_none() {
                    match TcpListener::bind(self.addr) {
                        Ok(listener) => {
                            if listener.set_nonblocking(true).is_err() {
                                return false;
                            }
                            self.listener = Some(listener);
                        }
                        Err(err) => {
                            log::trace!("tcp {}: bind failed: {}", self.addr, err);
                            return false;
                        }
                    }
                }

                match self.listener.as_ref().map(|listener| listener.accept()) {
                    Some(Ok((stream, peer))) => {
                        log::debug!("tcp {}: accepted {}", self.addr, peer);
                        stream
                    }
                    Some(Err(err)) if err.kind() == ErrorKind::WouldBlock => return false,
                    _ => return false,
                }
            }
        };

        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let _ = stream.set_nodelay(true);

        self.stream = Some(stream);
        true
    }

    fn close(&mut self) -> bool {
        self.stream = None;
        self.rx.clear();
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.pump();

        let mut copied = 0;
        while copied < buf.len() {
            match self.rx.pop_front() {
                Some(byte) => {
                    buf[copied] = byte;
                    copied += 1;
                }
                None => break,
            }
        }

        copied
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let Some(stream) = self.stream.as_mut() else {
            return 0;
        };

        let mut written = 0;
        while written < buf.len() {
            match stream.write(&buf[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::debug!("tcp {}: write error: {}", self.addr, err);
                    self.stream = None;
                    break;
                }
            }
        }

        written
    }

    fn flush(&mut self) -> bool {
        match self.stream.as_mut() {
            Some(stream) => stream.flush().is_ok(),
            None => false,
        }
    }

    fn clear(&mut self) -> bool {
        self.pump();
        self.rx.clear();
        true
    }

    fn available(&mut self) -> usize {
        self.pump();
        self.rx.len()
    }
}
