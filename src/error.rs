//! Errors surfaced by a single host's exchange.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Everything that can go wrong while fetching one host.
///
/// Each variant is fatal to its own pipeline only, with one exception:
/// [`Parse`] is recoverable — a malformed `Content-Length` is logged and the
/// body length is treated as zero, since there is no recovery path upstream.
/// None of the variants are retried, and none of them cross the batch driver
/// boundary; drivers catch them at the stage boundary and log them.
///
/// [`Parse`]: FetchError::Parse
#[derive(Debug, Error)]
pub enum FetchError {
    /// The host name could not be resolved to an address.
    #[error("failed to resolve host {host}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The remote host refused the connection or is unreachable.
    #[error("failed to connect to {addr}")]
    Connection {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Writing the request failed.
    #[error("failed to transmit request")]
    Transmission(#[source] io::Error),

    /// Reading the response failed after some bytes may already have been
    /// accumulated. The partial data is discarded.
    #[error("failed to receive response")]
    Reception(#[source] io::Error),

    /// The `Content-Length` header value is not a base-10 integer.
    #[error("malformed Content-Length value {value:?}")]
    Parse { value: String },
}
