//! Persisting completed responses.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::context::ConnectionContext;

/// Receives each completed response exactly once.
///
/// Drivers call [`deliver`](ResponseSink::deliver) after the Receive stage
/// has completed and the socket has been released; a delivery failure is
/// logged by the driver and does not affect other hosts.
pub trait ResponseSink: Send + Sync {
    fn deliver(&self, ctx: &ConnectionContext) -> io::Result<()>;
}

/// Writes one `<hostname>_<id>.txt` file per completed context.
///
/// Ids are unique within a batch, so the names cannot collide. CRLF line
/// breaks are normalized to LF on the way out.
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Creates the output directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<FileSink> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileSink { dir })
    }
}

impl ResponseSink for FileSink {
    fn deliver(&self, ctx: &ConnectionContext) -> io::Result<()> {
        let name = format!("{}_{}.txt", ctx.hostname(), ctx.id());
        let text = String::from_utf8_lossy(ctx.response()).replace("\r\n", "\n");
        fs::write(self.dir.join(name), text)
    }
}

/// A completed exchange as recorded by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct CompletedExchange {
    pub hostname: String,
    pub id: u32,
    pub response: Vec<u8>,
}

/// Collects completed exchanges in memory.
///
/// Useful for embedders that post-process responses themselves, and for
/// tests that assert on what a batch produced.
#[derive(Debug, Default)]
pub struct MemorySink {
    exchanges: Mutex<Vec<CompletedExchange>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    /// Takes everything delivered so far, in delivery order.
    pub fn take(&self) -> Vec<CompletedExchange> {
        std::mem::take(&mut *self.exchanges.lock().expect("sink poisoned"))
    }
}

impl ResponseSink for MemorySink {
    fn deliver(&self, ctx: &ConnectionContext) -> io::Result<()> {
        self.exchanges
            .lock()
            .expect("sink poisoned")
            .push(CompletedExchange {
                hostname: ctx.hostname().to_string(),
                id: ctx.id(),
                response: ctx.response().to_vec(),
            });
        Ok(())
    }
}
