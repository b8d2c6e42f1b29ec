//! Raw-socket HTTP/1.1 GET batches, four ways.
//!
//! This crate issues plain HTTP/1.1 GET requests over raw non-blocking
//! sockets and assembles complete responses from partial reads. It exists to
//! demonstrate the same multi-stage exchange — connect, send the request,
//! receive the response — under four different concurrency strategies, so
//! everything interesting lives in two places:
//!
//! * [`pipeline::StagePipeline`] — the per-connection state machine. It
//!   issues a non-blocking operation, reports what readiness it needs next,
//!   and resumes when the caller re-enters it. Together with the pure
//!   framing logic in [`framer`] it decides whether more data is needed.
//! * [`driver`] — the four schedulers ([`Strategy`]): sequential blocking,
//!   a bounded thread pool with blocking waits, inline completion-callback
//!   chaining over a `poll(2)` dispatch loop, and futures joined on a
//!   thread-pool executor.
//!
//! # Running a batch
//!
//! ```no_run
//! use std::sync::Arc;
//! use fourfetch::{run_batch, BatchConfig, FileSink, Strategy};
//!
//! # fn main() -> std::io::Result<()> {
//! let hosts = vec!["example.com/".to_string(), "example.net".to_string()];
//! let config = BatchConfig::new(hosts, Strategy::ThreadPoolBlocking);
//! let sink = Arc::new(FileSink::new("responses")?);
//! run_batch(&config, sink);
//! # Ok(())
//! # }
//! ```
//!
//! Each completed response is handed to a [`ResponseSink`]; each failed host
//! is logged (via the `log` facade) and produces no artifact, without
//! disturbing the rest of the batch.
//!
//! Deliberately out of scope: TLS, redirects, chunked-transfer decoding,
//! connection reuse, and cancellation — a silent remote stalls its pipeline
//! indefinitely.

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod framer;
pub mod pipeline;
pub mod request;
pub mod sink;

#[doc(inline)]
pub use crate::config::{BatchConfig, DEFAULT_PORT};
#[doc(inline)]
pub use crate::context::{ConnectionContext, StageSignal, READ_BUF_LEN};
#[doc(inline)]
pub use crate::driver::{run_batch, Strategy};
#[doc(inline)]
pub use crate::error::FetchError;
#[doc(inline)]
pub use crate::pipeline::{Interest, StagePipeline, Step};
#[doc(inline)]
pub use crate::sink::{CompletedExchange, FileSink, MemorySink, ResponseSink};
