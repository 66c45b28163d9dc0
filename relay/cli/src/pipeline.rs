//! stdin → hub → counter / fatal sink
//!
//! ```text
//!   feeder ──▶ ingress ──▶ Hub ──▶ counter Buffer ──▶ counter thread
//!     │                     │
//!     │                     └─ miss / diagnostic ──▶ fatal sink (fallback)
//!     └──▶ errors ──── static route ─────────────────▶ fatal sink
//! ```

use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use relay_core::{
    channel, Buffer, CleanupReport, EndpointId, Hub, Message, Receiver, RelayConfig, Sender,
};

use crate::counter::WordCounts;

/// Everything the pipeline produced
#[derive(Debug)]
pub struct Summary {
    /// Word totals
    pub counts: WordCounts,
    /// Messages that reached the fatal sink, in arrival order
    pub fatal: Vec<String>,
    /// What the hub closed on the way out
    pub report: CleanupReport,
}

/// What the feeder read
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    /// Lines read, valid or not
    pub lines: u64,
    /// Words sent to the hub
    pub words: u64,
    /// Lines that were not valid UTF-8
    pub invalid_lines: u64,
    /// Words too long for the counter
    pub oversized: u64,
}

/// Closes the producer endpoints so the pipeline drains and stops
#[derive(Debug, Clone)]
pub struct Shutdown {
    ingress: Sender<Message>,
    errors: Sender<Message>,
}

impl Shutdown {
    /// Close both producer endpoints; harmless if the feeder already did
    pub fn trigger(&self) {
        for sender in [&self.ingress, &self.errors] {
            if sender.close().is_ok() {
                tracing::debug!(endpoint = %sender.id(), "Producer closed by shutdown");
            }
        }
    }
}

/// A running word-count pipeline
pub struct Pipeline {
    hub: Hub<Message>,
    counter_buffer: Buffer<Message>,
    counter: JoinHandle<WordCounts>,
    sink: JoinHandle<Vec<String>>,
    ingress: Sender<Message>,
    errors: Sender<Message>,
    counter_id: EndpointId,
    overflow_id: EndpointId,
    max_key_len: usize,
}

impl Pipeline {
    /// Wire up the hub, counter and fatal sink and start their threads
    ///
    /// # Errors
    ///
    /// Fails if a thread cannot be spawned.
    pub fn start(config: &RelayConfig) -> Result<Self> {
        let (fatal_tx, fatal_rx) = channel(config.buffer_capacity);
        let sink = thread::Builder::new()
            .name("relay-fatal-sink".to_string())
            .spawn(move || report_fatal(&fatal_rx))
            .context("Failed to start fatal sink")?;

        let counter_buffer = Buffer::new();
        let (counter_in, counter_out) = counter_buffer
            .init(config.buffer_capacity)
            .context("Failed to start counter buffer")?;
        let counter = thread::Builder::new()
            .name("relay-counter".to_string())
            .spawn(move || WordCounts::consume(&counter_out))
            .context("Failed to start counter")?;

        let (errors, errors_rx) = channel(1);
        let mut hub = Hub::with_config(fatal_tx.clone(), &config.hub);
        hub.add_entry_point(counter_in.clone())?;
        hub.add_connection(errors_rx, fatal_tx)?;
        let ingress = hub.init().context("Failed to start hub")?;

        tracing::info!(
            counter = %counter_in.id(),
            fallback = %hub.fallback_id(),
            buffer_capacity = config.buffer_capacity,
            ingress_capacity = config.hub.ingress_capacity,
            "Pipeline started"
        );

        Ok(Self {
            hub,
            counter_buffer,
            counter,
            sink,
            ingress,
            errors,
            counter_id: counter_in.id(),
            // Never registered, so words sent here exercise the fallback.
            overflow_id: EndpointId::reserve(),
            max_key_len: config.max_key_len,
        })
    }

    /// Handle that stops the pipeline from another task
    #[must_use]
    pub fn shutdown_handle(&self) -> Shutdown {
        Shutdown {
            ingress: self.ingress.clone(),
            errors: self.errors.clone(),
        }
    }

    /// Read `input` on a background thread until EOF, then close the producers
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned; the producers are closed in
    /// that case so [`Pipeline::finish`] still returns.
    pub fn spawn_feeder<R>(&self, input: R) -> Result<JoinHandle<FeedStats>>
    where
        R: Read + Send + 'static,
    {
        let feeder = Feeder {
            ingress: self.ingress.clone(),
            errors: self.errors.clone(),
            counter: self.counter_id,
            overflow: self.overflow_id,
            max_key_len: self.max_key_len,
        };
        let spawned = thread::Builder::new()
            .name("relay-feeder".to_string())
            .spawn(move || feeder.run(BufReader::new(input)));

        spawned.map_err(|e| {
            self.shutdown_handle().trigger();
            anyhow!(e).context("Failed to start feeder")
        })
    }

    /// Wait for the producers to close, tear everything down, and collect
    /// the results
    ///
    /// # Errors
    ///
    /// Fails if the counter or the fatal sink panicked.
    pub fn finish(self) -> Result<Summary> {
        let Self {
            hub,
            counter_buffer,
            counter,
            sink,
            ..
        } = self;

        let report = hub.cleanup();
        counter_buffer.wait();

        let counts = counter
            .join()
            .map_err(|_| anyhow!("counter thread panicked"))?;
        let fatal = sink.join().map_err(|_| anyhow!("fatal sink panicked"))?;

        Ok(Summary {
            counts,
            fatal,
            report,
        })
    }
}

/// Print every fatal message to stderr as it arrives
fn report_fatal(inbox: &Receiver<Message>) -> Vec<String> {
    let mut seen = Vec::new();
    for message in inbox {
        let text = match message {
            Message::Fatal { text } => text,
            other => other.to_string(),
        };
        eprintln!("relay: {text}");
        seen.push(text);
    }
    seen
}

/// Turns input lines into messages
struct Feeder {
    ingress: Sender<Message>,
    errors: Sender<Message>,
    counter: EndpointId,
    overflow: EndpointId,
    max_key_len: usize,
}

impl Feeder {
    fn run<R: BufRead>(&self, input: R) -> FeedStats {
        let mut stats = FeedStats::default();
        if let Err(e) = self.feed(input, &mut stats) {
            tracing::debug!(error = %e, "Feeder stopped early");
        }

        for sender in [&self.ingress, &self.errors] {
            // Already closed when shutdown got there first.
            let _ = sender.close();
        }
        tracing::info!(
            lines = stats.lines,
            words = stats.words,
            invalid_lines = stats.invalid_lines,
            oversized = stats.oversized,
            "Input finished"
        );
        stats
    }

    fn feed<R: BufRead>(&self, input: R, stats: &mut FeedStats) -> Result<()> {
        for line in input.split(b'\n') {
            let mut bytes = match line {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.report_read_error(&e)?;
                    return Ok(());
                }
            };
            stats.lines += 1;
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }

            match String::from_utf8(bytes) {
                Ok(line) => self.send_words(&line, stats)?,
                Err(e) => {
                    stats.invalid_lines += 1;
                    self.ingress
                        .send(Message::foreign(e.as_bytes()))
                        .map_err(|_| anyhow!("ingress closed"))?;
                }
            }
        }
        Ok(())
    }

    fn send_words(&self, line: &str, stats: &mut FeedStats) -> Result<()> {
        let words = line
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|word| !word.is_empty());

        for word in words {
            let key = word.to_lowercase();
            let to = if key.chars().count() > self.max_key_len {
                stats.oversized += 1;
                self.overflow
            } else {
                self.counter
            };
            self.ingress
                .send(Message::count(to, key, 1))
                .map_err(|_| anyhow!("ingress closed"))?;
            stats.words += 1;
        }
        Ok(())
    }

    fn report_read_error(&self, error: &io::Error) -> Result<()> {
        tracing::warn!(error = %error, "Failed to read input");
        self.errors
            .send(Message::fatal(format!("reading input: {error}")))
            .map_err(|_| anyhow!("errors endpoint closed"))
    }
}
