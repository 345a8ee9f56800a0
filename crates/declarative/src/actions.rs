//! Built-in actions available to every dep.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::action::{ActionTable, Args, track};
use crate::command::{self, CommandEvent};
use crate::context::Ctx;
use crate::error::{BuildError, Result};
use crate::spec::rewrite_relative;
use crate::types::{CommandResult, Outcome, Resolved};

/// Expand `~` and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

fn keys(map: &Map<String, Value>) -> Value {
    Value::Array(map.keys().cloned().map(Value::String).collect())
}

pub fn default_actions() -> ActionTable {
    [
        track("use/dep", use_dep)
            .alias("dep")
            .capture(|args| data([("spec", args.get(0, "spec").cloned())])),
        track("use/conf", use_conf).alias("conf").capture(|args| {
            let mut names = args.named.keys().cloned().collect::<Vec<_>>();
            for value in &args.positional {
                if let Value::Object(map) = value {
                    names.extend(map.keys().cloned());
                }
            }
            data([("configs", Some(names.into()))])
        }),
        track("use/dirs", use_dirs)
            .alias("ensure_dirs")
            .capture(|args| data([("dirs", Some(args.strings().into()))])),
        track("render/str", render_str).alias("render_str").capture(|args| {
            data([
                ("template", args.get(0, "template").cloned()),
                ("rest_keys", Some(keys(&args.rest(&["template"])))),
            ])
        }),
        track("render/file", render_file)
            .alias("render_file")
            .alias("render")
            .capture(|args| {
                data([
                    ("src", args.get(0, "src").cloned()),
                    ("dst", args.get(1, "dst").cloned()),
                    ("rest_keys", Some(keys(&args.rest(&["src", "dst"])))),
                ])
            }),
        track("run/sh", run_sh)
            .alias("sh")
            .alias("run_shell")
            .capture(|args| {
                let env = match args.named.get("env") {
                    Some(Value::Object(env)) => keys(env),
                    _ => Value::Array(Vec::new()),
                };
                data([("cmd", args.get(0, "cmd").cloned()), ("env", Some(env))])
            }),
        track("run/sudo", run_sudo)
            .alias("sudo")
            .alias("run_privileged")
            .capture(|args| data([("cmd", args.get(0, "cmd").cloned())])),
    ]
    .into_iter()
    .collect()
}

fn data<const N: usize>(entries: [(&str, Option<Value>); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .filter_map(|(k, v)| Some((k.to_string(), v?)))
        .collect()
}

// ============================================================================
// use/*
// ============================================================================

fn use_dep(cx: &mut Ctx<'_>, args: &Args) -> Result<Outcome> {
    let raw = args.str("use/dep", 0, "spec")?;
    let rendered = cx.render_inline(&raw)?;
    let spec = rewrite_relative(&rendered, &cx.base());
    cx.progress("spec", spec.clone());

    let scope = cx.scope();
    let resolved = cx.resolve(&spec, scope)?;
    Ok(Outcome::Resolved(resolved))
}

fn use_conf(cx: &mut Ctx<'_>, args: &Args) -> Result<Outcome> {
    let scope = cx.scope();
    for value in &args.positional {
        match value {
            Value::Object(map) => {
                for (key, value) in map {
                    cx.engine.scopes.define(scope, key, value.clone());
                }
            }
            other => {
                return Err(BuildError::invalid_args(
                    "use/conf",
                    format!("positional values must be tables, got {other}"),
                ));
            }
        }
    }
    for (key, value) in &args.named {
        cx.engine.scopes.define(scope, key, value.clone());
    }
    Ok(Outcome::None)
}

fn use_dirs(cx: &mut Ctx<'_>, args: &Args) -> Result<Outcome> {
    let mut created = Vec::new();
    for raw in args.strings() {
        let rendered = cx.render_inline(&raw)?;
        let dir = expand_path(&rendered);
        cx.progress("folder", dir.display().to_string());
        std::fs::create_dir_all(&dir)
            .map_err(|e| BuildError::io(format!("creating {}", dir.display()), e))?;
        created.push(Value::String(dir.display().to_string()));
    }
    Ok(Outcome::Resolved(Resolved::Value(Value::Array(created))))
}

// ============================================================================
// render/*
// ============================================================================

fn render_str(cx: &mut Ctx<'_>, args: &Args) -> Result<Outcome> {
    let template = args.str("render/str", 0, "template")?;
    let extra = args.rest(&["template"]);
    let scope = cx.scope();
    let text = cx.render_template(&template, scope, &extra)?;
    cx.progress("rendered", text.clone());
    Ok(Outcome::Text(text))
}

/// Source files are looked up next to the declaring unit first.
fn source_path(cx: &mut Ctx<'_>, src: &Path) -> PathBuf {
    if src.is_absolute() {
        return src.to_path_buf();
    }
    let scope = cx.scope();
    let config_dir = cx
        .engine
        .scopes
        .get_ready(scope, "current_config_dir")
        .and_then(Value::as_str)
        .map(PathBuf::from);
    match config_dir {
        Some(dir) if dir.join(src).exists() => dir.join(src),
        _ => src.to_path_buf(),
    }
}

fn render_file(cx: &mut Ctx<'_>, args: &Args) -> Result<Outcome> {
    let src = args.str("render/file", 0, "src")?;
    let dst = args.str("render/file", 1, "dst")?;
    let extra = args.rest(&["src", "dst"]);

    let src = expand_path(&cx.render_inline(&src)?);
    let src = source_path(cx, &src);
    let dst = expand_path(&cx.render_inline(&dst)?);
    cx.progress("src", src.display().to_string());
    cx.progress("dst", dst.display().to_string());

    let template = std::fs::read_to_string(&src)
        .map_err(|e| BuildError::io(format!("reading {}", src.display()), e))?;
    let scope = cx.scope();
    let content = cx.render_template(&template, scope, &extra)?;
    cx.progress("rendered_content", content.clone());

    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| BuildError::io(format!("creating {}", parent.display()), e))?;
    }
    std::fs::write(&dst, content)
        .map_err(|e| BuildError::io(format!("writing {}", dst.display()), e))?;
    Ok(Outcome::Resolved(Resolved::Path(dst)))
}

// ============================================================================
// run/*
// ============================================================================

fn stream(cx: &mut Ctx<'_>, event: CommandEvent<'_>) {
    match event {
        CommandEvent::Spawned(pid) => cx.progress("pid", pid),
        CommandEvent::Line(line) => cx.log(line),
    }
}

fn finish(cx: &mut Ctx<'_>, result: CommandResult) -> Outcome {
    cx.progress("exitcode", result.exit_code);
    Outcome::Command(result)
}

/// The command text, rendered unless the caller passed `raw = true`.
fn command_text(cx: &mut Ctx<'_>, action: &str, args: &Args) -> Result<String> {
    let cmd = args.str(action, 0, "cmd")?;
    match args.named.get("raw") {
        Some(Value::Bool(true)) => Ok(cmd),
        _ => cx.render_inline(&cmd),
    }
}

fn run_sh(cx: &mut Ctx<'_>, args: &Args) -> Result<Outcome> {
    let cmd = command_text(cx, "run/sh", args)?;
    let env: BTreeMap<String, String> = match args.named.get("env") {
        Some(Value::Object(env)) => env
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect(),
        Some(other) => {
            return Err(BuildError::invalid_args(
                "run/sh",
                format!("`env` must be a table, got {other}"),
            ));
        }
        None => BTreeMap::new(),
    };
    cx.progress("cmd", cmd.clone());

    let result = command::run_shell(&cmd, &env, |event| stream(cx, event))
        .map_err(|e| BuildError::io(format!("running `{cmd}`"), e))?;
    Ok(finish(cx, result))
}

fn run_sudo(cx: &mut Ctx<'_>, args: &Args) -> Result<Outcome> {
    let cmd = command_text(cx, "run/sudo", args)?;
    cx.progress("cmd", cmd.clone());

    let password = std::env::var(&cx.engine.options.sudo_password_env).ok();
    let result = command::run_privileged(&cmd, password.as_deref(), |event| stream(cx, event))
        .map_err(|e| BuildError::io(format!("running `sudo {cmd}`"), e))?;
    Ok(finish(cx, result))
}

// ============================================================================
// Tests
// ============================================================================
