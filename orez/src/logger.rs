//! Structured logging.
//!
//! Level filtering and formatting go through `tracing-subscriber`. On top of
//! the formatted output, every event is mirrored into a bounded in-memory
//! ring buffer so the supervisor can attach a log tail to crash reports and
//! the dashboard can render recent activity without touching stdout.

use std::collections::VecDeque;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogFormat;

const RING_CAPACITY: usize = 1024;

static RING: Lazy<LogBuffer> = Lazy::new(|| LogBuffer::new(RING_CAPACITY));

/// One captured log line.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Fixed-capacity log line buffer, oldest lines evicted first.
pub struct LogBuffer {
    lines: Mutex<VecDeque<LogLine>>,
    capacity: usize,
}

impl LogBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn push(&self, line: LogLine) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let lines = self.lines.lock();
        lines.iter().skip(lines.len().saturating_sub(n)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

/// Process-wide log ring buffer.
pub fn buffer() -> &'static LogBuffer {
    &RING
}

struct RingLayer;

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        RING.push(LogLine {
            timestamp: Utc::now(),
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.message, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.message, " {}={:?}", field.name(), value);
        }
    }
}

/// Install the global subscriber. Idempotent so tests can call it freely.
pub fn init(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match format {
        LogFormat::Plain => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(RingLayer)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(RingLayer)
            .try_init(),
    };

    // Already set by a previous init; keep the first one.
    let _ = result;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(LogLine {
                timestamp: Utc::now(),
                level: Level::INFO,
                target: "test".into(),
                message: format!("line {}", i),
            });
        }

        assert_eq!(buffer.len(), 3);
        let tail = buffer.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].message, "line 3");
        assert_eq!(tail[1].message, "line 4");
    }

    #[test]
    fn tail_larger_than_buffer() {
        let buffer = LogBuffer::new(3);
        buffer.push(LogLine {
            timestamp: Utc::now(),
            level: Level::WARN,
            target: "test".into(),
            message: "only".into(),
        });

        let tail = buffer.tail(10);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "only");
    }
}
