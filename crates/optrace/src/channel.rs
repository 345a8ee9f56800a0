//! Duplex NDJSON channel between the worker and the observer.
//!
//! The worker end is synchronous: `send` hands events to a writer thread and
//! never blocks, `try_recv` polls control messages collected by a reader
//! thread. The observer end is async: `recv` waits with an adaptive backoff
//! that any activity (a new line, an explicit wake) collapses back to the
//! minimum delay.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Result, TransportError};
use crate::event::{ControlMessage, Event};
use crate::tracker::EventSink;

// ============================================================================
// Backoff
// ============================================================================

pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_GROWTH: f64 = 1.5;

/// Geometric idle delay with a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    growth: f64,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELAY, DEFAULT_MAX_DELAY, DEFAULT_GROWTH)
    }
}

/// Shortest poll delay; a zero delay would never grow.
pub const MIN_DELAY: Duration = Duration::from_millis(1);

impl Backoff {
    /// Growth factors below 1.0 are clamped to 1.0, `min` is at least
    /// [`MIN_DELAY`] and `max` is raised to `min` if needed.
    pub fn new(min: Duration, max: Duration, growth: f64) -> Self {
        let growth = if growth.is_finite() { growth.max(1.0) } else { 1.0 };
        let min = min.max(MIN_DELAY);
        let max = max.max(min);
        Self {
            min,
            max,
            growth,
            current: min,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Delay after an empty poll.
    pub fn grow(&mut self) -> Duration {
        let grown = (self.current.as_nanos() as f64 * self.growth).round();
        self.current = Duration::from_nanos(grown as u64).min(self.max);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

// ============================================================================
// Worker endpoint
// ============================================================================

/// Build-process end of the channel.
pub struct WorkerEndpoint {
    outgoing: Option<mpsc::Sender<Event>>,
    incoming: mpsc::Receiver<ControlMessage>,
    writer: Option<JoinHandle<()>>,
    shutdown: bool,
}

impl WorkerEndpoint {
    /// Events are written to `output`, control messages are read from `input`.
    pub fn new<W, R>(output: W, input: R) -> Self
    where
        W: Write + Send + 'static,
        R: Read + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel::<Event>();
        let writer = thread::spawn(move || write_events(output, &event_rx));

        let (control_tx, control_rx) = mpsc::channel();
        thread::spawn(move || read_control(input, &control_tx));

        Self {
            outgoing: Some(event_tx),
            incoming: control_rx,
            writer: Some(writer),
            shutdown: false,
        }
    }

    /// Endpoint over the process's own stdout/stdin.
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stdin())
    }

    pub fn send(&self, event: Event) -> Result<()> {
        self.outgoing
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(event)
            .map_err(|_| TransportError::Closed)
    }

    /// Next pending control message, if any.
    pub fn try_recv(&mut self) -> Option<ControlMessage> {
        let msg = self.incoming.try_recv().ok()?;
        if msg == ControlMessage::Shutdown {
            self.shutdown = true;
        }
        Some(msg)
    }

    /// Flush everything queued so far and stop the writer thread.
    pub fn close(&mut self) {
        self.outgoing.take();
        if let Some(writer) = self.writer.take()
            && writer.join().is_err()
        {
            log::warn!("Event writer thread panicked");
        }
    }
}

impl Drop for WorkerEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl EventSink for WorkerEndpoint {
    fn send(&mut self, event: Event) -> std::result::Result<(), TransportError> {
        WorkerEndpoint::send(self, event)
    }

    fn interrupted(&mut self) -> bool {
        while self.try_recv().is_some() {}
        self.shutdown
    }
}

fn write_events<W: Write>(mut output: W, events: &mpsc::Receiver<Event>) {
    for event in events {
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Dropping unencodable event: {e}");
                continue;
            }
        };
        if let Err(e) = writeln!(output, "{line}").and_then(|()| output.flush()) {
            log::debug!("Event stream closed: {e}");
            break;
        }
    }
}

fn read_control<R: Read>(input: R, messages: &mpsc::Sender<ControlMessage>) {
    for line in BufReader::new(input).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match ControlMessage::from_line(&line) {
            Ok(ControlMessage::Unknown) => log::debug!("Ignoring control message: {line}"),
            Ok(msg) => {
                if messages.send(msg).is_err() {
                    break;
                }
            }
            Err(e) => log::warn!("Malformed control message: {e}"),
        }
    }
}

// ============================================================================
// Observer endpoint
// ============================================================================

#[derive(Default)]
struct Inbox {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    closed: AtomicBool,
    shutdown: AtomicBool,
}

impl Inbox {
    fn push(&self, event: Event) {
        self.queue.lock().push_back(event);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Event> {
        self.queue.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn done(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst)
    }
}

/// Handle for nudging an [`ObserverEndpoint`] from elsewhere.
#[derive(Clone)]
pub struct Waker {
    inbox: Arc<Inbox>,
}

impl Waker {
    /// Cut the current idle wait short and reset the backoff.
    pub fn wake(&self) {
        self.inbox.notify.notify_one();
    }

    /// Make `recv` return `None` once the buffered events are drained.
    pub fn shutdown(&self) {
        self.inbox.shutdown.store(true, Ordering::SeqCst);
        self.inbox.notify.notify_one();
    }
}

/// Observer-process end of the channel.
pub struct ObserverEndpoint {
    inbox: Arc<Inbox>,
    control: Box<dyn Write + Send>,
    backoff: Backoff,
}

impl ObserverEndpoint {
    /// Events are read from `input`; control messages go to `control`.
    pub fn new<R, W>(input: R, control: W, backoff: Backoff) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let inbox = Arc::new(Inbox::default());
        let reader_inbox = Arc::clone(&inbox);
        thread::spawn(move || read_events(input, &reader_inbox));

        Self {
            inbox,
            control: Box::new(control),
            backoff,
        }
    }

    pub fn waker(&self) -> Waker {
        Waker {
            inbox: Arc::clone(&self.inbox),
        }
    }

    /// Delay the next idle wait would use.
    pub fn current_delay(&self) -> Duration {
        self.backoff.current()
    }

    /// Next event, or `None` once the stream ended or shutdown was requested
    /// and nothing is left in the buffer.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.inbox.pop() {
                self.backoff.reset();
                return Some(event);
            }
            if self.inbox.done() {
                return None;
            }
            let delay = self.backoff.current();
            tokio::select! {
                () = self.inbox.notify.notified() => self.backoff.reset(),
                () = tokio::time::sleep(delay) => {
                    self.backoff.grow();
                }
            }
        }
    }

    /// Everything currently buffered, without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.inbox.pop()).collect()
    }

    pub fn send_control(&mut self, message: ControlMessage) -> Result<()> {
        let line = message.to_line()?;
        writeln!(self.control, "{line}")?;
        self.control.flush()?;
        Ok(())
    }
}

fn read_events<R: Read>(input: R, inbox: &Inbox) {
    for line in BufReader::new(input).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::debug!("Event stream read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Event::from_line(&line) {
            Ok(Event::Unknown) => log::debug!("Ignoring unknown event: {line}"),
            Ok(event) => inbox.push(event),
            Err(e) => log::warn!("Skipping malformed event line: {e}"),
        }
    }
    inbox.close();
}

/// A connected worker/observer pair over OS pipes, for tests and embedding.
pub fn loopback(backoff: Backoff) -> std::io::Result<(WorkerEndpoint, ObserverEndpoint)> {
    let (event_rx, event_tx) = std::io::pipe()?;
    let (control_rx, control_tx) = std::io::pipe()?;
    let worker = WorkerEndpoint::new(event_tx, control_rx);
    let observer = ObserverEndpoint::new(event_rx, control_tx, backoff);
    Ok((worker, observer))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Data;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn log_event(line: &str) -> Event {
        Event::Log {
            op: "run/sh".into(),
            path: vec!["run/sh-1".into()],
            line: line.into(),
        }
    }

    #[test]
    fn test_backoff_grows_geometrically_to_cap() {
        let mut b = Backoff::default();
        assert_eq!(b.current(), Duration::from_millis(50));
        assert_eq!(b.grow(), Duration::from_millis(75));
        assert_eq!(b.grow(), Duration::from_micros(112_500));

        let mut previous = b.current();
        for _ in 0..30 {
            let next = b.grow();
            assert!(next >= previous);
            assert!(next <= Duration::from_secs(3));
            previous = next;
        }
        assert_eq!(b.current(), Duration::from_secs(3));

        b.reset();
        assert_eq!(b.current(), Duration::from_millis(50));
    }

    #[test]
    fn test_backoff_rejects_shrinking_growth() {
        let mut b = Backoff::new(Duration::from_millis(10), Duration::from_millis(5), 0.5);
        assert_eq!(b.grow(), Duration::from_millis(10));
    }

    #[test]
    fn test_backoff_zero_min_still_grows() {
        let mut b = Backoff::new(Duration::ZERO, Duration::from_millis(10), 2.0);
        assert_eq!(b.current(), MIN_DELAY);
        assert_eq!(b.grow(), Duration::from_millis(2));
        b.reset();
        assert_eq!(b.current(), MIN_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_recv_backs_off_to_cap() {
        let (_worker, mut observer) = loopback(Backoff::default()).unwrap();

        let waited = tokio::time::timeout(Duration::from_secs(60), observer.recv()).await;
        assert!(waited.is_err());
        assert_eq!(observer.current_delay(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_collapses_next_wait() {
        let (_worker, mut observer) = loopback(Backoff::default()).unwrap();

        let _ = tokio::time::timeout(Duration::from_secs(2), observer.recv()).await;
        assert!(observer.current_delay() > Duration::from_millis(500));

        observer.waker().wake();
        let _ = tokio::time::timeout(Duration::from_millis(10), observer.recv()).await;
        assert_eq!(observer.current_delay(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_events_cross_the_pipe_in_order() {
        let (mut worker, mut observer) = loopback(Backoff::default()).unwrap();
        worker.send(log_event("one")).unwrap();
        worker.send(log_event("two")).unwrap();
        worker.close();

        assert_eq!(observer.recv().await, Some(log_event("one")));
        assert_eq!(observer.recv().await, Some(log_event("two")));
        assert_eq!(observer.recv().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_keeps_buffered_events() {
        let (worker, mut observer) = loopback(Backoff::default()).unwrap();
        worker
            .send(Event::Start {
                op: "a".into(),
                path: vec!["a-1".into()],
                data: Data::new(),
                ts: Utc::now(),
            })
            .unwrap();

        // Give the reader thread a chance to buffer the line.
        let first = observer.recv().await;
        assert!(first.is_some());

        worker.send(log_event("late")).unwrap();
        while observer.inbox.queue.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        observer.waker().shutdown();

        assert_eq!(observer.recv().await, Some(log_event("late")));
        assert_eq!(observer.recv().await, None);
    }

    #[test]
    fn test_control_messages_reach_worker() {
        let (mut worker, mut observer) = loopback(Backoff::default()).unwrap();
        observer.send_control(ControlMessage::Shutdown).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !EventSink::interrupted(&mut worker) {
            assert!(std::time::Instant::now() < deadline, "shutdown never arrived");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
