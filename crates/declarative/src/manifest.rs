//! Build unit definitions.
//!
//! A unit is a TOML file with top-level `[vars]`, optional resolver
//! declarations (root unit only), and named targets. Each target is a list
//! of steps; every step becomes one tracked action call on the target's dep.
//! Embedders can also register native Rust entry points.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::action::Args;
use crate::context::Ctx;
use crate::error::{BuildError, Result};
use crate::registry::Resolver;
use crate::types::Outcome;

// ============================================================================
// Steps
// ============================================================================

/// One step of a target, written as a single-key table: `{ sh = "make" }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Request another dep
    Dep(String),
    /// Merge values into the target's scope
    Conf(Map<String, Value>),
    EnsureDirs(Vec<String>),
    #[serde(alias = "render_file")]
    Render(RenderFileStep),
    RenderStr(RenderStrStep),
    Sh(CommandStep),
    Sudo(CommandStep),
    /// Call any action by name or alias
    Call(CallStep),
    /// End the target early without failing it
    Stop(StopStep),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderFileStep {
    pub src: String,
    pub dst: String,
    #[serde(default)]
    pub vars: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderStrStep {
    pub template: String,
    #[serde(default)]
    pub vars: Map<String, Value>,
    /// Scope key that receives the rendered text
    pub into: Option<String>,
}

/// `sh`/`sudo` step: a bare command line or a full table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CommandStep {
    Line(String),
    Full(CommandSpec),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub cmd: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Probe command; the step is skipped when it succeeds
    pub unless: Option<String>,
    /// Fail the target on a non-zero exit
    #[serde(default = "default_true")]
    pub check: bool,
    /// Scope key that receives the command output
    pub into: Option<String>,
}

const fn default_true() -> bool {
    true
}

impl CommandStep {
    pub fn spec(&self) -> CommandSpec {
        match self {
            Self::Line(cmd) => CommandSpec {
                cmd: cmd.clone(),
                env: BTreeMap::new(),
                unless: None,
                check: true,
                into: None,
            },
            Self::Full(spec) => spec.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallStep {
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub into: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopStep {
    pub reason: String,
    pub data: Option<Value>,
}

// ============================================================================
// File format
// ============================================================================

/// A resolver that wraps shell commands, declared in the root unit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandResolverDef {
    pub name: String,
    /// Succeeds when the package is already present
    pub check: Option<String>,
    pub install: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    #[serde(default)]
    plugins: Vec<String>,
    #[serde(default)]
    vars: Map<String, Value>,
    #[serde(default)]
    resolvers: Vec<CommandResolverDef>,
    #[serde(default)]
    targets: BTreeMap<String, TargetFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetFile {
    #[serde(default)]
    failsafe: bool,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    steps: Vec<Step>,
}

// ============================================================================
// Targets
// ============================================================================

pub type NativeFn = Rc<dyn Fn(&mut Ctx<'_>) -> Result<()>>;
pub type ResolverFactory = Rc<dyn Fn() -> Rc<dyn Resolver>>;

#[derive(Clone)]
pub enum EntryPoint {
    Steps(Vec<Step>),
    Native(NativeFn),
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Steps(steps) => f.debug_tuple("Steps").field(steps).finish(),
            Self::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// A named entry point of a unit.
#[derive(Debug, Clone)]
pub struct Target {
    pub failsafe: bool,
    pub hidden: bool,
    pub entry: EntryPoint,
}

impl Target {
    pub fn steps(steps: Vec<Step>) -> Self {
        Self {
            failsafe: false,
            hidden: false,
            entry: EntryPoint::Steps(steps),
        }
    }

    pub fn native<F>(func: F) -> Self
    where
        F: Fn(&mut Ctx<'_>) -> Result<()> + 'static,
    {
        Self {
            failsafe: false,
            hidden: false,
            entry: EntryPoint::Native(Rc::new(func)),
        }
    }

    pub fn failsafe(mut self, failsafe: bool) -> Self {
        self.failsafe = failsafe;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn run(&self, cx: &mut Ctx<'_>) -> Result<()> {
        match &self.entry {
            EntryPoint::Steps(steps) => run_steps(cx, steps),
            EntryPoint::Native(func) => func(cx),
        }
    }
}

/// A parsed build unit.
#[derive(Default, Clone)]
pub struct Manifest {
    pub plugins: Vec<String>,
    pub vars: Map<String, Value>,
    pub resolvers: Vec<CommandResolverDef>,
    pub targets: BTreeMap<String, Target>,
    pub resolver_factories: Vec<ResolverFactory>,
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifest")
            .field("plugins", &self.plugins)
            .field("vars", &self.vars)
            .field("resolvers", &self.resolvers)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the TOML source of `unit`.
    pub fn parse(src: &str, unit: &str) -> Result<Self> {
        let file: ManifestFile = toml::from_str(src).map_err(|e| BuildError::Manifest {
            unit: unit.to_string(),
            message: e.to_string(),
        })?;

        let targets = file
            .targets
            .into_iter()
            .map(|(name, t)| {
                let target = Target::steps(t.steps).failsafe(t.failsafe).hidden(t.hidden);
                (name, target)
            })
            .collect();

        Ok(Self {
            plugins: file.plugins,
            vars: file.vars,
            resolvers: file.resolvers,
            targets,
            resolver_factories: Vec::new(),
        })
    }

    pub fn with_var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn with_plugin(mut self, name: &str) -> Self {
        self.plugins.push(name.to_string());
        self
    }

    pub fn with_target(mut self, name: &str, target: Target) -> Self {
        self.targets.insert(name.to_string(), target);
        self
    }

    pub fn with_command_resolver(mut self, def: CommandResolverDef) -> Self {
        self.resolvers.push(def);
        self
    }

    /// Register a custom resolver when this unit is the root.
    pub fn with_resolver<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Rc<dyn Resolver> + 'static,
    {
        self.resolver_factories.push(Rc::new(factory));
        self
    }

    /// Entry point name for `unit`: the explicit one, else the target named
    /// after the unit directory, else `main`.
    pub fn select_entry(&self, unit: &str, explicit: Option<&str>) -> String {
        if let Some(entry) = explicit.filter(|e| !e.is_empty()) {
            return entry.to_string();
        }
        let basename = unit.rsplit('/').next().unwrap_or_default();
        if !basename.is_empty() && self.targets.contains_key(basename) {
            basename.to_string()
        } else {
            "main".to_string()
        }
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }
}

// ============================================================================
// Step execution
// ============================================================================

fn run_steps(cx: &mut Ctx<'_>, steps: &[Step]) -> Result<()> {
    for step in steps {
        match step {
            Step::Dep(spec) => {
                cx.dep(spec)?;
            }
            Step::Conf(values) => cx.conf(values.clone())?,
            Step::EnsureDirs(dirs) => {
                cx.ensure_dirs(dirs.as_slice())?;
            }
            Step::Render(step) => {
                cx.render_file(&step.src, &step.dst, step.vars.clone())?;
            }
            Step::RenderStr(step) => {
                let text = cx.render_str(&step.template, step.vars.clone())?;
                store(cx, step.into.as_deref(), text)?;
            }
            Step::Sh(step) => run_command(cx, &step.spec(), false)?,
            Step::Sudo(step) => run_command(cx, &step.spec(), true)?,
            Step::Call(step) => {
                let args = Args {
                    positional: step.args.clone(),
                    named: step.kwargs.clone(),
                };
                let outcome = cx.call(&step.action, &args)?;
                let text = outcome_text(cx, &outcome);
                store(cx, step.into.as_deref(), text)?;
            }
            Step::Stop(step) => {
                return Err(BuildError::Stop {
                    reason: step.reason.clone(),
                    data: step.data.clone(),
                });
            }
        }
    }
    Ok(())
}

fn run_command(cx: &mut Ctx<'_>, spec: &CommandSpec, privileged: bool) -> Result<()> {
    if let Some(probe) = &spec.unless
        && cx.sh(probe)?.success()
    {
        cx.debug(&format!("Skipping `{}`, `{probe}` succeeded", spec.cmd));
        return Ok(());
    }

    let result = if privileged {
        cx.run_privileged(&spec.cmd)?
    } else {
        cx.run_shell(&spec.cmd, &spec.env)?
    };

    if spec.check && !result.success() {
        return Err(BuildError::Command {
            cmd: spec.cmd.clone(),
            code: result.exit_code,
        });
    }
    store(cx, spec.into.as_deref(), result.output())
}

fn outcome_text(cx: &Ctx<'_>, outcome: &Outcome) -> String {
    match outcome {
        Outcome::None => String::new(),
        Outcome::Text(text) => text.clone(),
        Outcome::Resolved(resolved) => cx.engine().display(resolved),
        Outcome::Command(result) => result.output(),
    }
}

fn store(cx: &mut Ctx<'_>, key: Option<&str>, text: String) -> Result<()> {
    let Some(key) = key else {
        return Ok(());
    };
    let mut values = Map::new();
    values.insert(key.to_string(), Value::String(text));
    cx.conf(values)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const UNIT: &str = r#"
plugins = ["brew"]

[vars]
editor = "nvim"

[[resolvers]]
name = "npm"
check = "npm ls -g {{ package }}"
install = "npm install -g {{ body }}"

[targets.main]
steps = [
  { dep = "./zsh" },
  { conf = { n = 1 } },
  { ensure_dirs = ["~/.config/kitty"] },
  { render = { src = "kitty.conf", dst = "~/.config/kitty/kitty.conf" } },
  { render_str = { template = "{{ editor }}", into = "editor_name" } },
  { sh = "echo hello" },
  { sh = { cmd = "make", env = { CC = "clang" }, unless = "test -f out", check = false } },
  { call = { action = "render/str", args = ["x"] } },
  { stop = { reason = "done" } },
]

[targets.shell]
failsafe = true
hidden = true
"#;

    #[test]
    fn test_parse_full_unit() {
        let manifest = Manifest::parse(UNIT, "").unwrap();

        assert_eq!(manifest.plugins, vec!["brew"]);
        assert_eq!(manifest.vars["editor"], json!("nvim"));
        assert_eq!(manifest.resolvers[0].name, "npm");

        let main = manifest.target("main").unwrap();
        let EntryPoint::Steps(steps) = &main.entry else {
            panic!("expected steps");
        };
        assert_eq!(steps.len(), 9);
        assert_eq!(steps[0], Step::Dep("./zsh".into()));
        assert_eq!(steps[5], Step::Sh(CommandStep::Line("echo hello".into())));

        let Step::Sh(full) = &steps[6] else {
            panic!("expected sh");
        };
        let spec = full.spec();
        assert_eq!(spec.env["CC"], "clang");
        assert_eq!(spec.unless.as_deref(), Some("test -f out"));
        assert!(!spec.check);

        let shell = manifest.target("shell").unwrap();
        assert!(shell.failsafe && shell.hidden);
    }

    #[test]
    fn test_bare_command_checks_by_default() {
        assert!(CommandStep::Line("true".into()).spec().check);
    }

    #[test]
    fn test_parse_error_names_unit() {
        let err = Manifest::parse("[targets.main]\nsteps = [{ bogus = 1 }]", "shell/zsh")
            .unwrap_err();
        assert!(err.to_string().contains("shell/zsh"));
    }

    #[test]
    fn test_select_entry() {
        let manifest = Manifest::new()
            .with_target("main", Target::steps(Vec::new()))
            .with_target("zsh", Target::steps(Vec::new()));

        assert_eq!(manifest.select_entry("shell/zsh", Some("plugins")), "plugins");
        assert_eq!(manifest.select_entry("shell/zsh", None), "zsh");
        assert_eq!(manifest.select_entry("shell/bash", None), "main");
        assert_eq!(manifest.select_entry("", None), "main");
    }
}
