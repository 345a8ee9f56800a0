//! Operation tracker: mints operation ids and keeps the ambient stack.
//!
//! The tracker is owned by the single build thread. Opening an operation
//! pushes a frame, closing it pops; every event is addressed to the
//! innermost open frame, so nesting never has to be passed around by hand.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::Utc;
use serde_json::Value;

use crate::error::TransportError;
use crate::event::{Data, Event, OpPath};

/// Destination for events produced by the tracker.
///
/// Implemented by the worker end of the channel and by in-memory sinks used
/// in tests and embedders.
pub trait EventSink {
    /// Deliver one event. Must not block on the consumer.
    fn send(&mut self, event: Event) -> Result<(), TransportError>;

    /// Whether the consumer asked the producer to stop.
    fn interrupted(&mut self) -> bool {
        false
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&mut self, _event: Event) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Sink that records events in memory.
///
/// Clones share the same buffer, so a test can keep one handle while the
/// engine owns the other.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Rc<RefCell<Vec<Event>>>,
    interrupted: Rc<RefCell<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Make subsequent [`EventSink::interrupted`] calls return true.
    pub fn interrupt(&self) {
        *self.interrupted.borrow_mut() = true;
    }
}

impl EventSink for MemorySink {
    fn send(&mut self, event: Event) -> Result<(), TransportError> {
        self.events.borrow_mut().push(event);
        Ok(())
    }

    fn interrupted(&mut self) -> bool {
        *self.interrupted.borrow()
    }
}

struct Frame {
    kind: String,
    path: OpPath,
}

/// Token returned by [`OpsTracker::start`]; hand it back to
/// [`OpsTracker::finish`] to close that operation.
#[derive(Debug)]
#[must_use = "an operation must be finished"]
pub struct OpToken {
    depth: usize,
}

/// Tracks open operations and turns lifecycle calls into events.
pub struct OpsTracker {
    sink: Box<dyn EventSink>,
    seq: u64,
    stack: Vec<Frame>,
    broken: bool,
}

impl OpsTracker {
    pub fn new(sink: Box<dyn EventSink>) -> Self {
        Self {
            sink,
            seq: 0,
            stack: Vec::new(),
            broken: false,
        }
    }

    /// Open a child of the innermost operation (or a root when none is open).
    pub fn start(&mut self, kind: &str, data: Data) -> OpToken {
        self.seq += 1;
        let mut path = self.current_path();
        path.push(format!("{kind}-{}", self.seq));

        let depth = self.stack.len();
        self.emit(Event::Start {
            op: kind.to_string(),
            path: path.clone(),
            data,
            ts: Utc::now(),
        });
        self.stack.push(Frame {
            kind: kind.to_string(),
            path,
        });
        OpToken { depth }
    }

    /// Close the operation opened with `token`, along with anything left open
    /// inside it.
    pub fn finish(&mut self, token: OpToken) {
        while self.stack.len() > token.depth {
            if let Some(frame) = self.stack.pop() {
                self.emit(Event::Finish {
                    op: frame.kind,
                    path: frame.path,
                    ts: Utc::now(),
                });
            }
        }
    }

    /// Append one output line to the innermost operation.
    pub fn log(&mut self, line: &str) {
        if let Some((op, path)) = self.top() {
            self.emit(Event::Log {
                op,
                path,
                line: line.to_string(),
            });
        }
    }

    /// Merge attributes into the innermost operation's data.
    pub fn progress(&mut self, data: Data) {
        if let Some((op, path)) = self.top() {
            self.emit(Event::Progress { op, path, data });
        }
    }

    /// Convenience for a single progress attribute.
    pub fn progress_one(&mut self, key: &str, value: impl Into<Value>) {
        let mut data = Data::new();
        data.insert(key.to_string(), value.into());
        self.progress(data);
    }

    /// Mark the innermost operation failed.
    pub fn error(&mut self, error: &str, trace: &str) {
        if let Some((op, path)) = self.top() {
            self.emit(Event::Error {
                op,
                path,
                error: error.to_string(),
                trace: trace.to_string(),
            });
        }
    }

    /// Mark the innermost operation stopped on purpose.
    pub fn stop(&mut self, reason: &str, data: Option<Value>) {
        if let Some((op, path)) = self.top() {
            self.emit(Event::Stop {
                op,
                path,
                reason: reason.to_string(),
                data,
            });
        }
    }

    pub fn debug(&mut self, message: &str) {
        let path = self.stack.last().map(|f| f.path.clone());
        self.emit(Event::Debug {
            message: message.to_string(),
            path,
        });
    }

    /// Path of the innermost open operation (empty at top level).
    pub fn current_path(&self) -> OpPath {
        self.stack.last().map(|f| f.path.clone()).unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn interrupted(&mut self) -> bool {
        self.sink.interrupted()
    }

    fn top(&self) -> Option<(String, OpPath)> {
        self.stack.last().map(|f| (f.kind.clone(), f.path.clone()))
    }

    fn emit(&mut self, event: Event) {
        if self.broken {
            return;
        }
        if let Err(e) = self.sink.send(event) {
            log::warn!("Event channel failed, dropping further events: {e}");
            self.broken = true;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
