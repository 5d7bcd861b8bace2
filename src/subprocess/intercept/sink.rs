//! Sinks receiving intercepted lines and the per-stream registry holding them

use anyhow::Result;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::types::StreamSource;

/// Receiver of one trimmed line of child output.
///
/// Errors are not caught by the consumer: a failing sink ends dispatch for
/// its stream.
pub trait LineSink: Send + Sync {
    fn on_line(&self, line: &str) -> Result<()>;

    /// Flush buffered output; called once when the pipeline stops
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<F> LineSink for F
where
    F: Fn(&str) -> Result<()> + Send + Sync,
{
    fn on_line(&self, line: &str) -> Result<()> {
        self(line)
    }
}

pub type SharedSink = Arc<dyn LineSink>;

/// Ordered, append-only sink lists for both streams.
///
/// Cloning shares the underlying lists. Registering while a pipeline runs is
/// allowed; whether a line already being dispatched reaches the new sink is
/// not defined.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    stdout: Arc<RwLock<Vec<SharedSink>>>,
    stderr: Arc<RwLock<Vec<SharedSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, source: StreamSource) -> &RwLock<Vec<SharedSink>> {
        match source {
            StreamSource::Stdout => &self.stdout,
            StreamSource::Stderr => &self.stderr,
        }
    }

    /// Append a sink. Registering the same sink twice invokes it twice.
    pub fn register(&self, source: StreamSource, sink: SharedSink) {
        self.list(source)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Current sinks of a stream in registration order
    pub fn snapshot(&self, source: StreamSource) -> Vec<SharedSink> {
        self.list(source)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self, source: StreamSource) -> usize {
        self.list(source)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self, source: StreamSource) -> bool {
        self.len(source) == 0
    }

    /// Flush every sink of a stream, logging failures
    pub fn flush(&self, source: StreamSource) {
        for sink in self.snapshot(source) {
            if let Err(e) = sink.flush() {
                tracing::warn!("Failed to flush {} sink: {:#}", source, e);
            }
        }
    }
}

/// Collects every line in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LineSink for MemorySink {
    fn on_line(&self, line: &str) -> Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_keeps_registration_order_per_stream() {
        let registry = SinkRegistry::new();
        let first = Arc::new(MemorySink::new());
        let second = Arc::new(MemorySink::new());

        registry.register(StreamSource::Stdout, first.clone());
        registry.register(StreamSource::Stdout, second.clone());

        assert_eq!(registry.len(StreamSource::Stdout), 2);
        assert!(registry.is_empty(StreamSource::Stderr));

        for sink in registry.snapshot(StreamSource::Stdout) {
            sink.on_line("x").unwrap();
        }
        assert_eq!(first.lines(), vec!["x"]);
        assert_eq!(second.lines(), vec!["x"]);
    }

    #[test]
    fn test_closure_is_a_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink: SharedSink = Arc::new(move |line: &str| -> Result<()> {
            captured.lock().unwrap().push(line.len());
            Ok(())
        });

        sink.on_line("four").unwrap();
        sink.flush().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_duplicate_registration_is_kept() {
        let registry = SinkRegistry::new();
        let sink = Arc::new(MemorySink::new());

        registry.register(StreamSource::Stderr, sink.clone());
        registry.register(StreamSource::Stderr, sink.clone());

        for s in registry.snapshot(StreamSource::Stderr) {
            s.on_line("twice").unwrap();
        }
        assert_eq!(sink.lines(), vec!["twice", "twice"]);
    }
}
