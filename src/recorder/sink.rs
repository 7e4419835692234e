use std::io::{self, Result as IoResult, Stdout, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::event::TraceEvent;

/// Abstraction over an output target that consumes trace events.
pub trait RecorderSink: Send + Sync {
    fn handle(&mut self, event: &TraceEvent) -> IoResult<()>;
}

/// Line-per-event stdout sink.
pub struct StdOutSink {
    handle: Stdout,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self {
            handle: io::stdout(),
        }
    }
}

impl RecorderSink for StdOutSink {
    fn handle(&mut self, event: &TraceEvent) -> IoResult<()> {
        writeln!(self.handle, "{event}")?;
        self.handle.flush()
    }
}

/// In-memory sink for tests and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<TraceEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies all captured events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.entries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl RecorderSink for MemorySink {
    fn handle(&mut self, event: &TraceEvent) -> IoResult<()> {
        self.entries.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Forwards events to an async consumer without blocking.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TraceEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<TraceEvent>) -> Self {
        Self { tx }
    }
}

impl RecorderSink for ChannelSink {
    fn handle(&mut self, event: &TraceEvent) -> IoResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }
}
