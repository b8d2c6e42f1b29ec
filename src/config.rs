//! Batch configuration.
//!
//! The host list is an explicit, immutable value handed into
//! [`run_batch`](crate::run_batch) — never a process-wide static.

use crate::driver::Strategy;

/// The default HTTP port.
pub const DEFAULT_PORT: u16 = 80;

/// Everything a batch run needs to know.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Host specs of the form `"domain[/path]"`.
    pub hosts: Vec<String>,
    /// Which of the four drivers schedules the batch.
    pub strategy: Strategy,
    /// Port every connection targets. 80 unless a test points the batch at
    /// a loopback listener.
    pub port: u16,
    /// Send the fixed browser-like header block instead of the minimal
    /// request.
    pub browser_headers: bool,
}

impl BatchConfig {
    pub fn new(hosts: Vec<String>, strategy: Strategy) -> BatchConfig {
        BatchConfig {
            hosts,
            strategy,
            port: DEFAULT_PORT,
            browser_headers: false,
        }
    }
}
