//! Deciding when an accumulated HTTP/1.1 response is complete.
//!
//! Everything in this module is pure: it consumes the accumulated byte
//! buffer and produces a verdict, never touching a socket. The pipeline
//! calls [`assess`] after every read; all functions are idempotent, and on a
//! buffer that only ever grows a [`Framing::Complete`] verdict never
//! regresses.
//!
//! Framing rules:
//!
//! * The header ends at the first `\r\n\r\n`.
//! * The body length is the value of the last `Content-Length` header line
//!   (case-sensitive name match — a `content-length` line is not a match).
//! * No `Content-Length` header means a body length of zero, so the response
//!   is complete as soon as the separator appears. Any body a server sends
//!   after that is truncated; callers that care must put the header on the
//!   wire. This mirrors the behavior of the header-only probes this tool
//!   descends from and is covered by tests rather than "fixed".

use crate::error::FetchError;

/// The header/body separator.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Where a response currently stands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Framing {
    /// The separator has not appeared yet.
    AwaitingHeader,
    /// Headers are in, the body is still short of the declared length.
    AwaitingBody {
        /// Bytes of body received so far.
        body_received: usize,
        /// Declared `Content-Length` (zero when malformed).
        content_length: usize,
    },
    /// The full response has been received.
    Complete {
        /// Offset of the first body byte.
        body_start: usize,
        /// Declared `Content-Length` (zero when absent or malformed).
        content_length: usize,
    },
}

/// Classifies the accumulated bytes.
pub fn assess(accumulated: &[u8]) -> Framing {
    let terminator = match find_terminator(accumulated) {
        Some(pos) => pos,
        None => return Framing::AwaitingHeader,
    };
    let body_start = terminator + HEADER_TERMINATOR.len();
    let content_length = declared_content_length(accumulated).unwrap_or(0);
    let body_received = accumulated.len() - body_start;
    if body_received >= content_length {
        Framing::Complete {
            body_start,
            content_length,
        }
    } else {
        Framing::AwaitingBody {
            body_received,
            content_length,
        }
    }
}

/// Whether the accumulated bytes form a complete response.
pub fn is_complete(accumulated: &[u8]) -> bool {
    matches!(assess(accumulated), Framing::Complete { .. })
}

/// The body slice of a complete response: every byte after the separator.
///
/// Returns `None` while the response is still incomplete.
pub fn body(accumulated: &[u8]) -> Option<&[u8]> {
    match assess(accumulated) {
        Framing::Complete { body_start, .. } => Some(&accumulated[body_start..]),
        _ => None,
    }
}

/// Parses the declared `Content-Length` out of the header region.
///
/// Lines are split on `\r` or `\n`, each line on its first `:`. The name
/// match is case-sensitive and the LAST occurrence wins. A missing header is
/// `Ok(0)`; a present header whose value is not a base-10 integer is
/// [`FetchError::Parse`] (callers log it and use zero).
///
/// Only bytes up to the separator are scanned. Scanning the body too would
/// let a header-shaped body line flip an already-complete verdict.
pub fn declared_content_length(accumulated: &[u8]) -> Result<usize, FetchError> {
    let header = match find_terminator(accumulated) {
        Some(pos) => &accumulated[..pos],
        None => accumulated,
    };
    let mut length = Ok(0);
    for line in header.split(|&b| b == b'\r' || b == b'\n') {
        let mut parts = line.splitn(2, |&b| b == b':');
        if parts.next() != Some(&b"Content-Length"[..]) {
            continue;
        }
        let value = match parts.next() {
            Some(value) => String::from_utf8_lossy(value),
            None => continue,
        };
        length = match value.trim().parse::<usize>() {
            Ok(n) => Ok(n),
            Err(_) => Err(FetchError::Parse {
                value: value.trim().to_string(),
            }),
        };
    }
    length
}

fn find_terminator(accumulated: &[u8]) -> Option<usize> {
    accumulated
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}
