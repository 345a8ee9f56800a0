//! # Optrace
//!
//! Event-sourced tracking of nested operations across a process boundary.
//!
//! ## Core Concepts
//!
//! - **Event**: typed lifecycle record (`op/start`, `op/log`, `op/progress`,
//!   `op/error`, `op/stop`, `op/finish`, `internal/debug`) addressed by an
//!   [`OpPath`]
//! - **OpsTracker**: producer side; mints ids and keeps the stack of open
//!   operations so nesting follows the call tree automatically
//! - **Channel**: NDJSON over a pair of byte streams; the worker end never
//!   blocks, the observer end waits with an adaptive [`Backoff`]
//! - **OpsView**: consumer side; rebuilds the operation tree from events
//!
//! ## Example
//!
//! ```
//! use optrace::{Data, Event, MemorySink, OpsTracker, OpsView};
//!
//! let sink = MemorySink::new();
//! let mut tracker = OpsTracker::new(Box::new(sink.clone()));
//! let op = tracker.start("run/sh", Data::new());
//! tracker.log("hello");
//! tracker.finish(op);
//!
//! let mut view = OpsView::new();
//! for event in sink.events() {
//!     view.apply(event);
//! }
//! assert!(view.is_complete());
//! ```

pub mod channel;
pub mod consumer;
pub mod error;
pub mod event;
pub mod tracker;

pub use channel::{Backoff, ObserverEndpoint, Waker, WorkerEndpoint, loopback};
pub use consumer::{OpState, Operation, OpsView};
pub use error::TransportError;
pub use event::{ControlMessage, Data, Event, OpPath};
pub use tracker::{EventSink, MemorySink, NullSink, OpToken, OpsTracker};
