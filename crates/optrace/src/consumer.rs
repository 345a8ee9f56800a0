//! Rebuilds the live operation tree from the event stream alone.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::event::{Data, Event, OpPath};

const MAX_DEBUG_MESSAGES: usize = 200;

/// Lifecycle state of an operation as seen by the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Init,
    InProgress,
    Succeeded,
    Failed,
    Stopped,
}

impl OpState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }
}

/// Observer-side view of one operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: String,
    pub path: OpPath,
    pub data: Data,
    pub logs: Vec<String>,
    pub state: OpState,
    pub error: Option<String>,
    pub trace: Option<String>,
    pub stop_reason: Option<String>,
    pub stop_data: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub children: Vec<OpPath>,
}

impl Operation {
    fn new(kind: String, path: OpPath) -> Self {
        Self {
            kind,
            path,
            data: Data::new(),
            logs: Vec::new(),
            state: OpState::Init,
            error: None,
            trace: None,
            stop_reason: None,
            stop_data: None,
            started_at: None,
            finished_at: None,
            children: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// String attribute from the operation's data.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.data.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// Operation tree keyed by path.
#[derive(Debug, Default)]
pub struct OpsView {
    ops: HashMap<OpPath, Operation>,
    roots: Vec<OpPath>,
    debug: VecDeque<String>,
}

impl OpsView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns false when the event was ignored.
    pub fn apply(&mut self, event: Event) -> bool {
        match event {
            Event::Start { op, path, data, ts } => {
                if path.is_empty() || self.ops.contains_key(&path) {
                    return false;
                }
                let parent = &path[..path.len() - 1];
                match self.ops.get_mut(parent) {
                    Some(parent) => parent.children.push(path.clone()),
                    None => self.roots.push(path.clone()),
                }
                let mut operation = Operation::new(op, path.clone());
                operation.data = data;
                operation.started_at = Some(ts);
                operation.state = OpState::InProgress;
                self.ops.insert(path, operation);
                true
            }
            Event::Log { path, line, .. } => self.update(&path, |op| op.logs.push(line)),
            Event::Progress { path, data, .. } => self.update(&path, |op| op.data.extend(data)),
            Event::Error {
                path, error, trace, ..
            } => self.update(&path, |op| {
                op.state = OpState::Failed;
                op.error = Some(error);
                op.trace = Some(trace);
            }),
            Event::Stop {
                path, reason, data, ..
            } => self.update(&path, |op| {
                if op.state != OpState::Failed {
                    op.state = OpState::Stopped;
                }
                op.stop_reason = Some(reason);
                op.stop_data = data;
            }),
            Event::Finish { path, ts, .. } => self.update(&path, |op| {
                if !op.state.is_terminal() {
                    op.state = OpState::Succeeded;
                }
                op.finished_at = Some(ts);
            }),
            Event::Debug { message, .. } => {
                if self.debug.len() == MAX_DEBUG_MESSAGES {
                    self.debug.pop_front();
                }
                self.debug.push_back(message);
                true
            }
            Event::Unknown => false,
        }
    }

    fn update(&mut self, path: &[String], f: impl FnOnce(&mut Operation)) -> bool {
        match self.ops.get_mut(path) {
            Some(op) if !op.is_finished() => {
                f(op);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, path: &[String]) -> Option<&Operation> {
        self.ops.get(path)
    }

    pub fn roots(&self) -> impl Iterator<Item = &Operation> {
        self.roots.iter().filter_map(|p| self.ops.get(p))
    }

    pub fn children<'a>(&'a self, op: &'a Operation) -> impl Iterator<Item = &'a Operation> {
        op.children.iter().filter_map(|p| self.ops.get(p))
    }

    pub fn debug_messages(&self) -> impl Iterator<Item = &str> {
        self.debug.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True once at least one root exists and every root has finished.
    pub fn is_complete(&self) -> bool {
        !self.roots.is_empty() && self.roots().all(Operation::is_finished)
    }

    /// True when any operation in the tree failed.
    pub fn has_failures(&self) -> bool {
        self.ops.values().any(|op| op.state == OpState::Failed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn p(ids: &[&str]) -> OpPath {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    fn start(path: &[&str]) -> Event {
        Event::Start {
            op: "test".into(),
            path: p(path),
            data: Data::new(),
            ts: Utc::now(),
        }
    }

    fn finish(path: &[&str]) -> Event {
        Event::Finish {
            op: String::new(),
            path: p(path),
            ts: Utc::now(),
        }
    }

    #[test]
    fn test_siblings_attach_to_parent() {
        let mut view = OpsView::new();
        view.apply(start(&["root-1"]));
        view.apply(start(&["root-1", "a-2"]));
        view.apply(start(&["root-1", "b-3"]));
        view.apply(Event::Log {
            op: "a".into(),
            path: p(&["root-1", "a-2"]),
            line: "from a".into(),
        });

        let root = view.get(&p(&["root-1"])).unwrap();
        let kids: Vec<_> = view.children(root).map(|c| c.path.clone()).collect();
        assert_eq!(kids, vec![p(&["root-1", "a-2"]), p(&["root-1", "b-3"])]);
        assert_eq!(view.get(&p(&["root-1", "a-2"])).unwrap().logs, vec!["from a"]);
        assert!(view.get(&p(&["root-1", "b-3"])).unwrap().logs.is_empty());
    }

    #[test]
    fn test_progress_overwrites_by_key() {
        let mut view = OpsView::new();
        view.apply(start(&["run/sh-1"]));
        for code in [json!(null), json!(0)] {
            let mut data = Data::new();
            data.insert("exitcode".into(), code);
            view.apply(Event::Progress {
                op: "run/sh".into(),
                path: p(&["run/sh-1"]),
                data,
            });
        }
        assert_eq!(view.get(&p(&["run/sh-1"])).unwrap().data["exitcode"], json!(0));
    }

    #[test]
    fn test_terminal_states() {
        let mut view = OpsView::new();
        view.apply(start(&["a-1"]));
        view.apply(start(&["b-2"]));
        view.apply(start(&["c-3"]));
        view.apply(Event::Error {
            op: "b".into(),
            path: p(&["b-2"]),
            error: "boom".into(),
            trace: "boom\ncaused by: io".into(),
        });
        view.apply(Event::Stop {
            op: "c".into(),
            path: p(&["c-3"]),
            reason: "skip".into(),
            data: Some(json!({"host": "x"})),
        });
        for id in ["a-1", "b-2", "c-3"] {
            view.apply(finish(&[id]));
        }

        assert_eq!(view.get(&p(&["a-1"])).unwrap().state, OpState::Succeeded);
        assert_eq!(view.get(&p(&["b-2"])).unwrap().state, OpState::Failed);
        let stopped = view.get(&p(&["c-3"])).unwrap();
        assert_eq!(stopped.state, OpState::Stopped);
        assert_eq!(stopped.stop_reason.as_deref(), Some("skip"));
        assert!(view.is_complete());
        assert!(view.has_failures());
    }

    #[test]
    fn test_unknown_paths_are_ignored() {
        let mut view = OpsView::new();
        assert!(!view.apply(finish(&["ghost-9"])));
        assert!(!view.apply(Event::Unknown));
        assert!(view.is_empty());
    }

    #[test]
    fn test_partial_stream_is_incomplete() {
        let mut view = OpsView::new();
        view.apply(start(&["root-1"]));
        view.apply(start(&["root-1", "x-2"]));
        view.apply(finish(&["root-1", "x-2"]));
        assert!(!view.is_complete());
        assert_eq!(view.roots().count(), 1);
    }

    #[test]
    fn test_no_events_after_finish() {
        let mut view = OpsView::new();
        view.apply(start(&["a-1"]));
        view.apply(finish(&["a-1"]));
        let late = Event::Log {
            op: "a".into(),
            path: p(&["a-1"]),
            line: "late".into(),
        };
        assert!(!view.apply(late));
    }

    #[test]
    fn test_debug_messages_are_bounded() {
        let mut view = OpsView::new();
        for i in 0..(MAX_DEBUG_MESSAGES + 10) {
            view.apply(Event::Debug {
                message: format!("m{i}"),
                path: None,
            });
        }
        assert_eq!(view.debug_messages().count(), MAX_DEBUG_MESSAGES);
        assert_eq!(view.debug_messages().next(), Some("m10"));
    }
}
