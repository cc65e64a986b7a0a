//! One-shot fake identity provider.
//!
//! The provider answers the first `GET /token?...` with a fixed token and
//! remembers the request target, so tests can check which template and user
//! were asked for. The listener runs in non-blocking mode behind a deadline
//! so a client that never connects cannot stall the suite.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

const ACCEPT_WINDOW: Duration = Duration::from_secs(5);
const READ_WINDOW: Duration = Duration::from_millis(500);

/// Handle to a running fake provider.
///
/// Dropping the handle unblocks and joins the server thread.
#[derive(Debug)]
#[must_use]
pub struct IdentityServer {
    handle: Option<thread::JoinHandle<Option<String>>>,
    addr: SocketAddr,
}

impl IdentityServer {
    /// `host:port` to configure as the identity provider address.
    #[must_use]
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Wait for the server and return the request target it served, such as
    /// `/token?template=...&UserID=...`.
    ///
    /// # Panics
    ///
    /// Panics when called twice.
    pub fn join(mut self) -> thread::Result<Option<String>> {
        self.handle.take().expect("server already joined").join()
    }
}

impl Drop for IdentityServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Connect to unblock the accept loop; the outcome is irrelevant.
            drop(TcpStream::connect(self.addr));
            drop(handle.join());
        }
    }
}

/// Spawn a provider that hands out `token` once.
///
/// # Panics
///
/// Panics when no local port can be bound.
pub fn spawn_identity_server(token: impl Into<String>) -> IdentityServer {
    let token = token.into();
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind identity listener");
    listener
        .set_nonblocking(true)
        .expect("set listener non-blocking");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || serve_once(&listener, &token));
    IdentityServer {
        handle: Some(handle),
        addr,
    }
}

fn serve_once(listener: &TcpListener, token: &str) -> Option<String> {
    let mut stream = accept_connection(listener, Instant::now() + ACCEPT_WINDOW)?;
    stream
        .set_nonblocking(true)
        .expect("set stream non-blocking");
    let request = read_request(&mut stream, Instant::now() + READ_WINDOW)?;
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_owned);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{token}",
        token.len()
    );
    drop(stream.write_all(response.as_bytes()));
    target
}

fn accept_connection(listener: &TcpListener, deadline: Instant) -> Option<TcpStream> {
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Some(stream),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return None;
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => panic!("failed to accept identity connection: {err}"),
        }
    }
}

/// Read until the end of the request head or the deadline.
fn read_request(stream: &mut TcpStream, deadline: Instant) -> Option<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 512];
    while Instant::now() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                head.extend(buf.iter().take(n));
                if head.windows(4).any(|window| window == b"\r\n\r\n") {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => break,
        }
    }
    (!head.is_empty()).then(|| String::from_utf8_lossy(&head).into_owned())
}
