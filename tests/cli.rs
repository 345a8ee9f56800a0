//! The binary end to end: worker event stream, observer exit codes and the
//! inspection subcommands.

use std::path::Path;
use std::process::{Command, Output, Stdio};

use optrace::{Event, OpsView};

fn confctl(settings_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_confctl"));
    cmd.env("CONFCTL_CONFIG_FILE", settings_dir.join("missing.toml"))
        .env_remove("CONFCTL_CONFIGS_ROOT")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null());
    cmd
}

fn configs(dir: &Path) {
    std::fs::write(
        dir.join(".confbuild.toml"),
        "[targets.main]\nsteps = [{ conf = { greeting = \"hi\" } }]\n",
    )
    .unwrap();
    std::fs::create_dir_all(dir.join("hello")).unwrap();
    std::fs::write(
        dir.join("hello/.confbuild.toml"),
        "[targets.hello]\nsteps = [{ sh = \"echo {{ greeting }} there\" }]\n\n\
         [targets.broken]\nsteps = [{ sh = \"exit 3\" }]\n",
    )
    .unwrap();
}

fn events(output: &Output) -> Vec<Event> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| Event::from_line(line).unwrap())
        .collect()
}

#[test]
fn test_worker_streams_events_on_stdout() {
    let tmp = tempfile::tempdir().unwrap();
    configs(tmp.path());

    let output = confctl(tmp.path())
        .args(["worker", "--root"])
        .arg(tmp.path())
        .args(["--", "//hello"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let events = events(&output);
    assert!(events.iter().any(
        |e| matches!(e, Event::Log { op, line, .. } if op == "run/sh" && line == "hi there")
    ));

    let mut view = OpsView::new();
    for event in events {
        view.apply(event);
    }
    assert!(view.is_complete());
    assert!(!view.has_failures());
}

#[test]
fn test_worker_exit_code_reports_failure() {
    let tmp = tempfile::tempdir().unwrap();
    configs(tmp.path());

    let output = confctl(tmp.path())
        .args(["worker", "--root"])
        .arg(tmp.path())
        .args(["--", "//hello:broken"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let mut view = OpsView::new();
    for event in events(&output) {
        view.apply(event);
    }
    assert!(view.is_complete());
    assert!(view.has_failures());
}

#[test]
fn test_build_mirrors_worker_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    configs(tmp.path());

    let ok = confctl(tmp.path())
        .args(["build", "--plain", "--root"])
        .arg(tmp.path())
        .arg("//hello")
        .output()
        .unwrap();
    assert!(ok.status.success(), "{ok:?}");
    assert!(String::from_utf8_lossy(&ok.stderr).contains("hi there"));

    let failed = confctl(tmp.path())
        .args(["build", "--plain", "--root"])
        .arg(tmp.path())
        .arg("//hello:broken")
        .output()
        .unwrap();
    assert_eq!(failed.status.code(), Some(1));
}

#[test]
fn test_broken_root_unit_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join(".confbuild.toml"), "[targets.main\nsteps = [").unwrap();

    let worker = confctl(tmp.path())
        .args(["worker", "--root"])
        .arg(tmp.path())
        .args(["--", "//:main"])
        .output()
        .unwrap();
    assert_eq!(worker.status.code(), Some(1));
    assert!(events(&worker).iter().any(
        |e| matches!(e, Event::Error { error, .. } if error.contains("invalid build unit"))
    ));

    let build = confctl(tmp.path())
        .args(["build", "--plain", "--root"])
        .arg(tmp.path())
        .arg("//:main")
        .output()
        .unwrap();
    assert_eq!(build.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&build.stderr).contains("invalid build unit"));
}

#[test]
fn test_targets_lists_units() {
    let tmp = tempfile::tempdir().unwrap();
    configs(tmp.path());

    let output = confctl(tmp.path())
        .args(["targets", "--root"])
        .arg(tmp.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("//hello:hello"));
    assert!(stdout.contains("//hello:broken"));
    assert!(stdout.contains("//:main"));
}

#[test]
fn test_spec_shows_parsed_parts() {
    let tmp = tempfile::tempdir().unwrap();
    let output = confctl(tmp.path())
        .args(["spec", "brew::jq@1.7?tap=core"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("brew::jq@1.7"));
    assert!(stdout.contains("param tap: core"));
}
