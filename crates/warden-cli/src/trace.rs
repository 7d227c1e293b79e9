//! Capture of engine decision events for `warden explain --trace`.
//!
//! [`MatchTraceCollector`] is a `tracing` layer that keeps the most recent
//! events in a bounded ring buffer, with all of their fields rendered, and a
//! [`TraceReader`] handle drains them between requests.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// A single captured event.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub level: Level,
    pub target: String,
    pub message: String,
    /// The event's other fields as `name=value`, in recording order.
    pub fields: Vec<String>,
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>5} {}", self.level, self.message)?;
        for field in &self.fields {
            write!(f, " {field}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct TraceBuffer {
    entries: VecDeque<TraceEntry>,
    capacity: usize,
}

impl TraceBuffer {
    fn push(&mut self, entry: TraceEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// A `tracing` layer that captures events into a shared ring buffer.
#[derive(Debug, Clone)]
pub struct MatchTraceCollector {
    buffer: Arc<Mutex<TraceBuffer>>,
}

impl MatchTraceCollector {
    /// Create a new collector with the given ring buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(TraceBuffer {
                entries: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
            })),
        }
    }

    pub fn reader(&self) -> TraceReader {
        TraceReader {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<S: Subscriber> Layer<S> for MatchTraceCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(TraceEntry {
                level: *metadata.level(),
                target: metadata.target().to_string(),
                message: visitor.message,
                fields: visitor.fields,
            });
        }
    }
}

/// A read handle for the trace buffer.
#[derive(Debug, Clone)]
pub struct TraceReader {
    buffer: Arc<Mutex<TraceBuffer>>,
}

impl TraceReader {
    /// Remove and return everything captured so far.
    pub fn drain(&self) -> Vec<TraceEntry> {
        self.buffer
            .lock()
            .map(|mut buf| buf.entries.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let mut rendered = String::new();
            let _ = write!(rendered, "{}={value:?}", field.name());
            self.fields.push(rendered);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }
}
