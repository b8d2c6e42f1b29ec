//! Demo batch: fetch a fixed host list with one strategy.
//!
//! The host list and strategy are compile-time constants, like the lab
//! exercise this descends from; embedders wanting runtime configuration
//! should call [`fourfetch::run_batch`] themselves.

use std::sync::Arc;

use fourfetch::{run_batch, BatchConfig, FileSink, Strategy};

const STRATEGY: Strategy = Strategy::FutureChain;

const OUTPUT_DIR: &str = "responses";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let hosts = vec![
        "www.cs.ubbcluj.ro/~rlupsa/edu/pdp/".to_string(),
        "www.cs.ubbcluj.ro/~forest".to_string(),
        "www.cs.ubbcluj.ro/~motogna/LFTC".to_string(),
    ];
    let config = BatchConfig::new(hosts, STRATEGY);

    let sink = match FileSink::new(OUTPUT_DIR) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            eprintln!("cannot create output directory {}: {}", OUTPUT_DIR, e);
            std::process::exit(1);
        }
    };

    run_batch(&config, sink);
}
