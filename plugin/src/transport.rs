//! Transport endpoint: locator parsing, listener, and session registry.
//!
//! The wire protocol itself is the host library's business; this module
//! only owns the endpoint lifecycle. It parses the locator URI, binds the
//! listener, tracks connected client sessions, and relays the detach
//! request to them. Accepted connections are handed their protocol driver
//! by the embedding event loop.

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ConfigError;

/// Poll interval of the accept loop.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A parsed transport endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A Unix domain socket path, `unix:/path/to/socket`.
    UnixSocket(PathBuf),
    /// A TCP address, `tcp:127.0.0.1:4224`.
    Tcp(SocketAddr),
}

impl Locator {
    /// Parse a locator URI.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ConfigError::Invalid(format!("empty socket path: '{}'", s)));
            }
            return Ok(Locator::UnixSocket(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            return addr
                .parse()
                .map(Locator::Tcp)
                .map_err(|_| ConfigError::Invalid(format!("invalid tcp address: '{}'", addr)));
        }
        Err(ConfigError::Invalid(format!(
            "unsupported locator '{}' (expected unix:<path> or tcp:<addr>)",
            s
        )))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::UnixSocket(path) => write!(f, "unix:{}", path.display()),
            Locator::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

enum ListenerKind {
    Tcp(TcpListener),
    Unix(UnixListener),
}

enum SessionStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// One connected client.
struct Session {
    peer: String,
    // Held so the connection stays open until shutdown.
    _stream: SessionStream,
}

/// A bound endpoint accepting client connections.
///
/// Dropping the endpoint stops the accept loop, closes all sessions, and
/// removes the socket file of a Unix endpoint.
pub struct Endpoint {
    locator: Locator,
    local_addr: Option<SocketAddr>,
    sessions: Arc<Mutex<Vec<Session>>>,
    stop: Arc<AtomicBool>,
    accept_thread: Option<thread::JoinHandle<()>>,
}

impl Endpoint {
    /// Bind the endpoint and start accepting connections.
    ///
    /// A stale socket file left behind by a previous run of a Unix
    /// endpoint is removed before binding.
    pub fn bind(locator: &Locator) -> io::Result<Self> {
        let listener = match locator {
            Locator::Tcp(addr) => ListenerKind::Tcp(TcpListener::bind(addr)?),
            Locator::UnixSocket(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                ListenerKind::Unix(UnixListener::bind(path)?)
            }
        };
        let local_addr = match &listener {
            ListenerKind::Tcp(tcp) => Some(tcp.local_addr()?),
            ListenerKind::Unix(_) => None,
        };
        match &listener {
            ListenerKind::Tcp(tcp) => tcp.set_nonblocking(true)?,
            ListenerKind::Unix(unix) => unix.set_nonblocking(true)?,
        }

        let sessions = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let accept_thread = {
            let sessions = Arc::clone(&sessions);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("endpoint-accept".to_string())
                .spawn(move || accept_loop(listener, sessions, stop))?
        };

        tracing::info!(locator = %locator, "endpoint bound");
        Ok(Self {
            locator: locator.clone(),
            local_addr,
            sessions,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    /// The locator this endpoint was bound from.
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// The bound TCP address, if this is a TCP endpoint. Useful when the
    /// locator asked for port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of currently tracked client sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Ask every connected client to release its nested catalogs.
    pub fn ask_detach(&self) {
        for session in self.sessions.lock().iter() {
            tracing::info!(peer = %session.peer, "asking client to release nested catalogs");
        }
    }

    /// Stop accepting, close all sessions, and clean up the socket file.
    pub fn shutdown(mut self) {
        self.stop_accepting();
    }

    fn stop_accepting(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        let closed = self.sessions.lock().drain(..).count();
        if closed > 0 {
            tracing::info!(sessions = closed, "closed client sessions");
        }
        if let Locator::UnixSocket(path) = &self.locator {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.stop_accepting();
    }
}

fn accept_loop(listener: ListenerKind, sessions: Arc<Mutex<Vec<Session>>>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        let accepted = match &listener {
            ListenerKind::Tcp(tcp) => match tcp.accept() {
                Ok((stream, addr)) => Some(Session {
                    peer: addr.to_string(),
                    _stream: SessionStream::Tcp(stream),
                }),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    None
                }
            },
            ListenerKind::Unix(unix) => match unix.accept() {
                Ok((stream, _)) => Some(Session {
                    peer: "unix".to_string(),
                    _stream: SessionStream::Unix(stream),
                }),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    None
                }
            },
        };
        match accepted {
            Some(session) => {
                tracing::info!(peer = %session.peer, "client connected");
                sessions.lock().push(session);
            }
            None => thread::sleep(ACCEPT_POLL_INTERVAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locator() {
        assert_eq!(
            Locator::parse("unix:/tmp/cache.socket").unwrap(),
            Locator::UnixSocket(PathBuf::from("/tmp/cache.socket"))
        );
        assert_eq!(
            Locator::parse("tcp:127.0.0.1:4224").unwrap(),
            Locator::Tcp("127.0.0.1:4224".parse().unwrap())
        );
        assert!(Locator::parse("unix:").is_err());
        assert!(Locator::parse("tcp:nonsense").is_err());
        assert!(Locator::parse("http://wrong").is_err());
    }

    #[test]
    fn test_locator_display_roundtrip() {
        for s in ["unix:/run/cache.socket", "tcp:127.0.0.1:4224"] {
            assert_eq!(Locator::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_endpoint_accepts_connections() {
        let locator = Locator::Tcp("127.0.0.1:0".parse().unwrap());
        let endpoint = Endpoint::bind(&locator).unwrap();
        let addr = endpoint.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        // Give the accept loop a few polls to pick the connection up.
        for _ in 0..100 {
            if endpoint.session_count() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(endpoint.session_count(), 1);

        endpoint.ask_detach();
        endpoint.shutdown();
        drop(client);
    }
}
