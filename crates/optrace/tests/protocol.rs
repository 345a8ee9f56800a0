//! End-to-end: tracker -> pipe -> observer -> OpsView.

use std::collections::HashSet;

use optrace::{Backoff, Data, Event, OpState, OpsTracker, OpsView, loopback};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_tree_survives_the_process_boundary() {
    let (worker, mut observer) = loopback(Backoff::default()).unwrap();
    let mut tracker = OpsTracker::new(Box::new(worker));

    let root = tracker.start("build/specs", Data::new());
    let dep = tracker.start("build/dep", Data::new());
    let sh = tracker.start("run/sh", Data::new());
    tracker.log("compiling");
    tracker.progress_one("exitcode", 1);
    tracker.error("exit 1", "exit 1");
    tracker.finish(sh);
    tracker.stop("skipped on this host", None);
    tracker.finish(dep);
    tracker.finish(root);
    drop(tracker);

    let mut events = Vec::new();
    while let Some(event) = observer.recv().await {
        events.push(event);
    }

    // Start for P precedes any event for a path extending P.
    let mut started: HashSet<Vec<String>> = HashSet::new();
    for event in &events {
        let path = event.path().unwrap().to_vec();
        if matches!(event, Event::Start { .. }) {
            assert!(started.insert(path.clone()));
        }
        for len in 1..=path.len() {
            assert!(started.contains(&path[..len].to_vec()), "{path:?} before its start");
        }
    }

    let mut view = OpsView::new();
    for event in events {
        view.apply(event);
    }
    assert!(view.is_complete());

    let root = view.roots().next().unwrap();
    assert_eq!(root.state, OpState::Succeeded);
    let dep = view.children(root).next().unwrap();
    assert_eq!(dep.state, OpState::Stopped);
    let sh = view.children(dep).next().unwrap();
    assert_eq!(sh.state, OpState::Failed);
    assert_eq!(sh.logs, vec!["compiling"]);
    assert_eq!(sh.data["exitcode"], 1);
}

#[tokio::test]
async fn test_abrupt_end_leaves_partial_tree() {
    let (worker, mut observer) = loopback(Backoff::default()).unwrap();
    let mut tracker = OpsTracker::new(Box::new(worker));
    let _root = tracker.start("build/specs", Data::new());
    let _dep = tracker.start("build/dep", Data::new());
    drop(tracker);

    let mut view = OpsView::new();
    while let Some(event) = observer.recv().await {
        view.apply(event);
    }
    assert_eq!(view.len(), 2);
    assert!(!view.is_complete());
}
