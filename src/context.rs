//! Per-request mutable state.

use std::net::{SocketAddr, ToSocketAddrs};

use socket2::Socket;

use crate::error::FetchError;

/// Size of the fixed read buffer.
///
/// The buffer is reused across reads and never resized; the framer handles
/// responses spanning many buffer-fills.
pub const READ_BUF_LEN: usize = 512;

/// A one-shot stage completion flag.
///
/// Starts out not signaled and transitions exactly once. The pipeline only
/// ever signals a stage after its operation has been issued, so observing a
/// signaled flag implies the stage really ran.
#[derive(Debug, Default)]
pub struct StageSignal {
    signaled: bool,
}

impl StageSignal {
    pub(crate) fn signal(&mut self) {
        debug_assert!(!self.signaled, "stage signaled twice");
        self.signaled = true;
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled
    }
}

/// Mutable record for one outstanding request.
///
/// Exactly one pipeline writes to a context at a time; the socket is owned
/// exclusively and is closed exactly once — explicitly after a completed
/// Receive, or by `Drop` whenever a pipeline is abandoned part-way.
#[derive(Debug)]
pub struct ConnectionContext {
    id: u32,
    hostname: String,
    request_path: String,
    remote_addr: SocketAddr,
    pub(crate) socket: Option<Socket>,
    pub(crate) read_buf: [u8; READ_BUF_LEN],
    pub(crate) response: Vec<u8>,
    pub(crate) connect_done: StageSignal,
    pub(crate) send_done: StageSignal,
    pub(crate) receive_done: StageSignal,
}

impl ConnectionContext {
    /// Builds a context for one `"domain[/path]"` host spec, resolving the
    /// domain to an address on `port`.
    ///
    /// Note that the resolution here is blocking; it happens upstream of the
    /// non-blocking stages, before the pipeline is created. A name that does
    /// not resolve aborts this host with [`FetchError::Resolution`] — no
    /// retry, no artifact.
    pub fn resolve(spec: &str, id: u32, port: u16) -> Result<ConnectionContext, FetchError> {
        let (hostname, request_path) = split_host_spec(spec);
        let resolution_failure = |source| FetchError::Resolution {
            host: hostname.to_string(),
            source,
        };
        let remote_addr = (hostname, port)
            .to_socket_addrs()
            .map_err(resolution_failure)?
            .next()
            .ok_or_else(|| {
                resolution_failure(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "resolved to no addresses",
                ))
            })?;
        Ok(ConnectionContext {
            id,
            hostname: hostname.to_string(),
            request_path: request_path.to_string(),
            remote_addr,
            socket: None,
            read_buf: [0; READ_BUF_LEN],
            response: Vec::new(),
            connect_done: StageSignal::default(),
            send_done: StageSignal::default(),
            receive_done: StageSignal::default(),
        })
    }

    /// Unique id within this batch (a monotonic counter, so output names
    /// derived from it never collide).
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The resolved DNS name, stripped of any path suffix.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The URL path portion, `"/"` when the spec carried none.
    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// All response bytes received so far, in arrival order.
    pub fn response(&self) -> &[u8] {
        &self.response
    }

    /// The body of the completed response (bytes after the header
    /// separator), or `None` if reception never completed.
    pub fn body(&self) -> Option<&[u8]> {
        crate::framer::body(&self.response)
    }

    pub fn connect_signaled(&self) -> bool {
        self.connect_done.is_signaled()
    }

    pub fn send_signaled(&self) -> bool {
        self.send_done.is_signaled()
    }

    pub fn receive_signaled(&self) -> bool {
        self.receive_done.is_signaled()
    }
}

/// Splits `"domain[/path]"` into the domain and the path (default `"/"`).
fn split_host_spec(spec: &str) -> (&str, &str) {
    match spec.find('/') {
        Some(pos) => (&spec[..pos], &spec[pos..]),
        None => (spec, "/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_spec_without_path_defaults_to_root() {
        assert_eq!(split_host_spec("www.cs.ubbcluj.ro"), ("www.cs.ubbcluj.ro", "/"));
    }

    #[test]
    fn host_spec_splits_at_the_first_slash() {
        assert_eq!(
            split_host_spec("www.cs.ubbcluj.ro/~rlupsa/edu/pdp/"),
            ("www.cs.ubbcluj.ro", "/~rlupsa/edu/pdp/")
        );
    }

    #[test]
    fn resolve_keeps_the_path_and_port() {
        let ctx = ConnectionContext::resolve("127.0.0.1/some/where", 7, 8080).unwrap();
        assert_eq!(ctx.hostname(), "127.0.0.1");
        assert_eq!(ctx.request_path(), "/some/where");
        assert_eq!(ctx.remote_addr().port(), 8080);
        assert_eq!(ctx.id(), 7);
    }

    #[test]
    fn unresolvable_host_is_a_resolution_failure() {
        // RFC 2606 reserves .invalid, so this can never resolve.
        match ConnectionContext::resolve("no-such-host.invalid", 0, 80) {
            Err(crate::error::FetchError::Resolution { host, .. }) => {
                assert_eq!(host, "no-such-host.invalid");
            }
            other => panic!("expected a resolution failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn stage_signals_start_unsignaled_and_latch() {
        let mut signal = StageSignal::default();
        assert!(!signal.is_signaled());
        signal.signal();
        assert!(signal.is_signaled());
    }
}
