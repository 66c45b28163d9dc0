//! relay - Count Words Through a Routing Hub
//!
//! Reads stdin line by line and sends every word through a relay hub to a
//! counter. Words that are too long, lines that are not UTF-8, and read
//! errors take the fallback and diagnostic paths and are reported on stderr.
//! When input ends (or on Ctrl-C) the hub drains, and the most frequent words
//! are printed as `count<TAB>word`.
//!
//! # Usage
//!
//! ```bash
//! # Top 10 words of a file
//! relay < book.txt
//!
//! # Top 3, rendezvous buffers
//! relay --top 3 --capacity 0 < book.txt
//!
//! # With config file
//! relay --config ./relay.toml < book.txt
//!
//! # Verbose logging
//! RUST_LOG=debug relay < book.txt
//! ```

mod counter;
mod pipeline;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::{config, logging, ConfigOverrides};
use tokio::signal;
use tracing::{info, warn};

use pipeline::Pipeline;

/// relay - count words from stdin through a routing hub
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Capacity of the counter buffer endpoints (0 = rendezvous)
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    capacity: Option<i64>,

    /// Capacity of the hub's ingress endpoints (0 = rendezvous)
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    ingress_capacity: Option<i64>,

    /// Number of words to print
    #[arg(short = 'n', long, value_name = "N")]
    top: Option<usize>,

    /// Longest word the counter accepts
    #[arg(long, value_name = "N")]
    max_key_len: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            buffer_capacity: self.capacity,
            ingress_capacity: self.ingress_capacity,
            top: self.top,
            max_key_len: self.max_key_len,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => config::load_config_from_path(Some(path.clone())),
        None => config::load_config(),
    }
    .context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line option")?;

    logging::init_logging(&config.log_level);
    info!(source = %config.source(), "relay starting");

    let pipeline = Pipeline::start(&config)?;
    let shutdown = pipeline.shutdown_handle();
    let feeder = pipeline.spawn_feeder(io::stdin())?;

    let mut finished = tokio::task::spawn_blocking(move || pipeline.finish());
    let summary = tokio::select! {
        result = &mut finished => result.context("Pipeline task failed")??,
        _ = signal::ctrl_c() => {
            warn!("Interrupted; draining what was already read");
            shutdown.trigger();
            finished.await.context("Pipeline task failed")??
        }
    };

    // The feeder may still be blocked on stdin after an interrupt.
    if feeder.is_finished() && feeder.join().is_err() {
        warn!("Feeder thread panicked");
    }

    let mut out = io::stdout().lock();
    for (word, count) in summary.counts.top(config.top) {
        writeln!(out, "{count}\t{word}")?;
    }
    out.flush()?;

    info!(
        words = summary.counts.len(),
        fatal = summary.fatal.len(),
        closed = summary.report.closed.len(),
        dropped = summary.report.stats.dropped,
        "relay finished"
    );
    Ok(())
}
