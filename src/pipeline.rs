//! The per-connection Connect → Send → Receive state machine.
//!
//! A [`StagePipeline`] owns one [`ConnectionContext`] and drives it through
//! the three-stage exchange using non-blocking operations only. The contract
//! with callers is deliberately scheduler-agnostic:
//!
//! * [`advance()`] attempts as much progress as the socket allows. It
//!   returns [`Step::Wait`] when the pending operation would block, naming
//!   the readiness the pipeline needs before `advance()` is worth calling
//!   again, or [`Step::Finished`] once the response is complete.
//! * How the caller waits is the caller's business: the blocking drivers
//!   park on [`wait()`], the callback driver multiplexes many pipelines over
//!   one `poll(2)` call and re-enters `advance()` inline from the readiness
//!   notification.
//!
//! Within one pipeline the stages run strictly in order, each completion
//! signal fires exactly once, and no two reads are ever outstanding at the
//! same time. There are no timeouts: a silent remote stalls its pipeline
//! indefinitely.
//!
//! [`advance()`]: StagePipeline::advance
//! [`wait()`]: StagePipeline::wait

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::context::ConnectionContext;
use crate::error::FetchError;
use crate::framer;

/// The kind of I/O readiness a pending operation is waiting for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interest {
    /// The socket must become readable.
    Read,
    /// The socket must become writable.
    Write,
}

impl Interest {
    pub(crate) fn as_poll_events(self) -> libc::c_short {
        match self {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
        }
    }
}

/// What a call to [`StagePipeline::advance`] left behind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    /// An operation was issued and would block; wait for this readiness,
    /// then call `advance()` again.
    Wait(Interest),
    /// The response is complete; take the context with
    /// [`StagePipeline::into_context`].
    Finished,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Init,
    Connecting,
    Sending,
    Receiving,
    Done,
}

/// Drives one [`ConnectionContext`] through the three-stage exchange.
#[derive(Debug)]
pub struct StagePipeline {
    ctx: ConnectionContext,
    request: Vec<u8>,
    state: State,
    saw_header: bool,
}

impl StagePipeline {
    /// Wraps a context and the serialized request text. No I/O happens until
    /// the first [`advance()`](Self::advance).
    pub fn new(ctx: ConnectionContext, request: Vec<u8>) -> StagePipeline {
        StagePipeline {
            ctx,
            request,
            state: State::Init,
            saw_header: false,
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// The socket's file descriptor, once the Connect stage has been issued.
    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.ctx.socket.as_ref().map(|s| s.as_raw_fd())
    }

    /// Attempts progress until the socket pushes back or the exchange ends.
    pub fn advance(&mut self) -> Result<Step, FetchError> {
        loop {
            match self.state {
                State::Init => {
                    if let Some(step) = self.issue_connect()? {
                        return Ok(step);
                    }
                }
                State::Connecting => self.finish_connect()?,
                State::Sending => {
                    if let Some(step) = self.send_request()? {
                        return Ok(step);
                    }
                }
                State::Receiving => {
                    if let Some(step) = self.receive_chunk()? {
                        return Ok(step);
                    }
                }
                State::Done => return Ok(Step::Finished),
            }
        }
    }

    /// Blocks the calling thread until the requested readiness arrives.
    ///
    /// This is the OS-level completion primitive of the blocking-wait
    /// drivers. The callback driver never calls it.
    pub fn wait(&self, interest: Interest) -> Result<(), FetchError> {
        let fd = self
            .raw_fd()
            .expect("waiting on a pipeline that has not issued an operation");
        wait_ready(fd, interest).map_err(|e| self.stage_error(e))
    }

    /// Shuts the connection down and hands the context back.
    ///
    /// Only meaningful after [`Step::Finished`]; the socket is released
    /// here, exactly once. Abandoned pipelines release theirs through
    /// `Drop` instead.
    pub fn into_context(mut self) -> ConnectionContext {
        debug_assert_eq!(self.state, State::Done);
        if let Some(socket) = self.ctx.socket.take() {
            // Mirrors the original's shutdown-both-then-close; failure here
            // only means the peer went first.
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
        self.ctx
    }

    /// Creates the non-blocking socket and issues the connect.
    ///
    /// A connect on a non-blocking socket either finishes immediately or
    /// reports `EINPROGRESS`; the verdict is then read with `take_error()`
    /// once the socket becomes writable.
    fn issue_connect(&mut self) -> Result<Option<Step>, FetchError> {
        let addr = self.ctx.remote_addr();
        let connection_failure = |source| FetchError::Connection { addr, source };

        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let type_ = Type::STREAM.nonblocking().cloexec();
        let socket = Socket::new(domain, type_, Some(Protocol::TCP)).map_err(connection_failure)?;

        let result = socket.connect(&SockAddr::from(addr));
        self.ctx.socket = Some(socket);
        self.state = State::Connecting;
        match result {
            Ok(()) => Ok(None),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                Ok(Some(Step::Wait(Interest::Write)))
            }
            Err(e) => Err(connection_failure(e)),
        }
    }

    /// Reads the connect verdict off the now-writable socket.
    fn finish_connect(&mut self) -> Result<(), FetchError> {
        let addr = self.ctx.remote_addr();
        let verdict = self
            .socket()
            .take_error()
            .map_err(|source| FetchError::Connection { addr, source })?;
        if let Some(source) = verdict {
            return Err(FetchError::Connection { addr, source });
        }
        self.ctx.connect_done.signal();
        debug!(
            "connection {} > socket connected to {} ({})",
            self.ctx.id(),
            self.ctx.hostname(),
            addr
        );
        self.state = State::Sending;
        Ok(())
    }

    /// Issues the single non-blocking write of the request.
    ///
    /// A short write is not handled: the whole payload is assumed to be
    /// accepted in one operation (known simplification of this design).
    fn send_request(&mut self) -> Result<Option<Step>, FetchError> {
        let ctx = &mut self.ctx;
        let socket = ctx.socket.as_mut().expect("sending without a socket");
        let sent = loop {
            match socket.write(&self.request) {
                Ok(sent) => break sent,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Some(Step::Wait(Interest::Write)));
                }
                Err(e) => return Err(FetchError::Transmission(e)),
            }
        };
        ctx.send_done.signal();
        debug!("connection {} > sent {} bytes to server", ctx.id(), sent);
        self.state = State::Receiving;
        Ok(None)
    }

    /// Performs one read into the fixed buffer and judges completion.
    ///
    /// Incomplete responses re-issue the read immediately (the buffer is
    /// overwritten each time); a zero-byte read means the peer closed and
    /// the response is taken as complete with whatever was accumulated.
    fn receive_chunk(&mut self) -> Result<Option<Step>, FetchError> {
        let ctx = &mut self.ctx;
        let socket = ctx.socket.as_mut().expect("receiving without a socket");
        let read = loop {
            match socket.read(&mut ctx.read_buf) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Some(Step::Wait(Interest::Read)));
                }
                Err(e) => return Err(FetchError::Reception(e)),
            }
        };

        if read == 0 {
            // Peer closed before the framer judged completion. Graceful
            // early stop, not an error.
            debug!(
                "connection {} > peer closed with {} bytes accumulated",
                ctx.id(),
                ctx.response.len()
            );
            return Ok(self.finish_receive());
        }

        ctx.response.extend_from_slice(&ctx.read_buf[..read]);
        self.note_header_transition();
        if framer::is_complete(&self.ctx.response) {
            return Ok(self.finish_receive());
        }
        Ok(None)
    }

    /// Logs the `Content-Length` parse verdict once, when the header first
    /// becomes visible.
    fn note_header_transition(&mut self) {
        if self.saw_header {
            return;
        }
        if let framer::Framing::AwaitingHeader = framer::assess(&self.ctx.response) {
            return;
        }
        self.saw_header = true;
        if let Err(e) = framer::declared_content_length(&self.ctx.response) {
            warn!("connection {} > {}; treating length as 0", self.ctx.id(), e);
        }
    }

    fn finish_receive(&mut self) -> Option<Step> {
        self.ctx.receive_done.signal();
        self.state = State::Done;
        Some(Step::Finished)
    }

    fn socket(&self) -> &Socket {
        self.ctx.socket.as_ref().expect("socket missing")
    }

    /// Maps a readiness-wait failure to the error kind of the stage that was
    /// waiting.
    fn stage_error(&self, source: io::Error) -> FetchError {
        match self.state {
            State::Init | State::Connecting => FetchError::Connection {
                addr: self.ctx.remote_addr(),
                source,
            },
            State::Sending => FetchError::Transmission(source),
            State::Receiving | State::Done => FetchError::Reception(source),
        }
    }
}

/// Blocks until `fd` reports the requested readiness.
pub(crate) fn wait_ready(fd: RawFd, interest: Interest) -> io::Result<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events: interest.as_poll_events(),
        revents: 0,
    };
    loop {
        // SAFETY: `poll` reads and writes only the pollfd array we pass it,
        // and we pass a valid pointer to exactly one entry.
        let rc = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if rc >= 0 {
            // Error conditions (POLLERR/POLLHUP) also count as readiness:
            // retrying the operation surfaces the actual error.
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
