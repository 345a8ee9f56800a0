//! Execution context threaded through every action call.
//!
//! A [`Ctx`] borrows the engine mutably and remembers which dep is the
//! caller and whether a failsafe ancestor governs the current call chain.
//! The stack of open operations lives in the engine's tracker, so nested
//! calls made through a `Ctx` nest automatically.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::action::{Action, Args};
use crate::dep::{BuildState, Dep, DepId};
use crate::engine::Engine;
use crate::error::{BuildError, Result};
use crate::scope::ScopeId;
use crate::types::{CommandResult, Outcome, Resolved};

/// How a tracked call ended, once the operation is closed.
pub(crate) enum Tracked<T> {
    Done(T),
    /// Target code asked to stop; the operation recorded a stop
    Stopped,
    /// The call failed, the error was reported, and policy muted it
    Muted(String),
}

/// Execution context for target code and actions.
pub struct Ctx<'e> {
    pub(crate) engine: &'e mut Engine,
    caller: Option<DepId>,
    failsafe: bool,
}

impl<'e> Ctx<'e> {
    pub(crate) fn new(engine: &'e mut Engine, caller: Option<DepId>, failsafe: bool) -> Self {
        Self {
            engine,
            caller,
            failsafe,
        }
    }

    pub fn engine(&self) -> &Engine {
        &*self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut *self.engine
    }

    /// The dep on whose behalf actions are running (`None` at global level).
    pub fn caller(&self) -> Option<DepId> {
        self.caller
    }

    pub fn caller_dep(&self) -> Option<&Dep> {
        self.caller.map(|id| self.engine.registry.dep(id))
    }

    /// Whether a failsafe ancestor mutes build failures in this call chain.
    pub fn is_failsafe(&self) -> bool {
        self.failsafe
    }

    /// Scope actions read from and write to.
    pub fn scope(&self) -> ScopeId {
        self.caller_dep().map_or(self.engine.global, |d| d.scope)
    }

    /// Base directory for `./` specs.
    pub fn base(&self) -> String {
        self.caller_dep().map(|d| d.base.clone()).unwrap_or_default()
    }

    fn action_src(&self) -> String {
        self.caller_dep()
            .map_or_else(|| "(global)".to_string(), Dep::fqn)
    }

    /// Run `f` with `dep` as the caller.
    pub fn with_caller<T>(&mut self, dep: DepId, f: impl FnOnce(&mut Ctx<'_>) -> T) -> T {
        let mut inner = Ctx::new(&mut *self.engine, Some(dep), self.failsafe);
        f(&mut inner)
    }

    // ========================================================================
    // Operation tracking
    // ========================================================================

    /// Run `f` inside a new operation of kind `kind`.
    ///
    /// Errors are always reported on the operation before it finishes. A stop
    /// request ends here. Other errors propagate unless `mute` is set.
    pub(crate) fn tracked<T>(
        &mut self,
        kind: &str,
        mut data: Map<String, Value>,
        mute: bool,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<Tracked<T>> {
        if self.engine.tracker.interrupted() {
            return Err(BuildError::Interrupted);
        }

        data.entry("action_src")
            .or_insert_with(|| Value::String(self.action_src()));
        let token = self.engine.tracker.start(kind, data);

        let outcome = match f(self) {
            Ok(value) => Ok(Tracked::Done(value)),
            Err(BuildError::Stop { reason, data }) => {
                self.engine.tracker.stop(&reason, data);
                Ok(Tracked::Stopped)
            }
            Err(err) => {
                self.engine.tracker.error(&err.to_string(), &err.trace());
                if mute && !err.is_interrupt() {
                    let message = format!("Muted `{kind}` failure in {}: {err}", self.action_src());
                    log::debug!("{message}");
                    self.engine.tracker.debug(&message);
                    Ok(Tracked::Muted(err.to_string()))
                } else {
                    Err(err)
                }
            }
        };

        self.engine.tracker.finish(token);
        outcome
    }

    /// Merge one attribute into the current operation's data.
    pub fn progress(&mut self, key: &str, value: impl Into<Value>) {
        self.engine.tracker.progress_one(key, value);
    }

    pub fn log(&mut self, line: &str) {
        self.engine.tracker.log(line);
    }

    pub fn debug(&mut self, message: &str) {
        log::debug!("{message}");
        self.engine.tracker.debug(message);
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Look up an action on the caller, falling back to the defaults.
    ///
    /// Scopes only hold values, never callables, so there is no scope chain
    /// to walk here: the engine's default action table is the one enclosing
    /// level every dep shares.
    pub fn get_action(&self, name: &str) -> Result<Action> {
        self.caller_dep()
            .and_then(|d| d.get_action(name))
            .or_else(|| self.engine.defaults.get(name))
            .cloned()
            .ok_or_else(|| BuildError::ActionNotFound {
                name: name.to_string(),
                owner: self.action_src(),
            })
    }

    pub fn call(&mut self, name: &str, args: &Args) -> Result<Outcome> {
        let action = self.get_action(name)?;
        self.invoke(&action, args)
    }

    /// Call an action on behalf of another dep.
    pub fn call_on(&mut self, dep: DepId, name: &str, args: &Args) -> Result<Outcome> {
        self.with_caller(dep, |cx| cx.call(name, args))
    }

    /// Run `action` as a tracked operation.
    ///
    /// A failure is muted when the action is failsafe or the calling dep is.
    pub fn invoke(&mut self, action: &Action, args: &Args) -> Result<Outcome> {
        let data = action.data(args);
        let mute = action.is_failsafe() || self.caller_dep().is_some_and(|d| d.failsafe);
        match self.tracked(action.name(), data, mute, |cx| action.run(cx, args))? {
            Tracked::Done(outcome) => Ok(outcome),
            Tracked::Stopped | Tracked::Muted(_) => Ok(Outcome::None),
        }
    }

    // ========================================================================
    // Scope
    // ========================================================================

    /// Read `key` from the caller's scope, rendering a deferred value once.
    pub fn get(&mut self, key: &str) -> Result<Value> {
        let scope = self.scope();
        self.lookup(scope, key)?.ok_or_else(|| BuildError::KeyNotFound {
            key: key.to_string(),
        })
    }

    /// [`Ctx::get`] as display text.
    pub fn get_str(&mut self, key: &str) -> Result<String> {
        Ok(match self.get(key)? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Store a ready value in the caller's scope without tracking.
    pub fn set(&mut self, key: &str, value: Value) {
        let scope = self.scope();
        self.engine.scopes.set(scope, key, value);
    }

    // ========================================================================
    // Graph
    // ========================================================================

    /// Dispatch `raw` to the first resolver that claims it.
    pub fn resolve(&mut self, raw: &str, scope: ScopeId) -> Result<Resolved> {
        for resolver in self.engine.registry.resolvers() {
            if resolver.can_resolve(&*self.engine, raw, scope) {
                log::trace!("`{raw}` handled by `{}`", resolver.name());
                return resolver.resolve(self, raw, scope);
            }
        }
        Err(BuildError::NoResolverFound {
            spec: raw.to_string(),
        })
    }

    /// Build `id` unless it already ran; returns the memoized result.
    ///
    /// A failure is muted when the dep itself is failsafe or a failsafe
    /// ancestor governs this call chain. The root's flag protects only the
    /// root.
    pub fn build(&mut self, id: DepId) -> Result<Resolved> {
        let dep = self.engine.registry.dep(id);
        let fqn = dep.fqn();
        let mute = dep.failsafe || self.failsafe;

        match &dep.state {
            BuildState::Built(result) => return Ok(result.clone()),
            BuildState::Building => return Err(BuildError::Cycle { fqn }),
            BuildState::Failed(message) if mute => {
                log::debug!("Skipping {fqn}, it failed earlier: {message}");
                return Ok(Resolved::Nothing);
            }
            BuildState::Failed(message) => {
                return Err(BuildError::PreviouslyFailed {
                    fqn,
                    message: message.clone(),
                });
            }
            BuildState::Unbuilt => {}
        }

        let inherited = self.failsafe || (dep.failsafe && !dep.root);
        let builder = dep.builder.clone();
        let mut data = Map::new();
        data.insert("target_fqn".into(), Value::String(fqn.clone()));
        data.insert("target_name".into(), Value::String(dep.spec.body.clone()));
        data.insert("hidden".into(), Value::Bool(dep.ui.hidden));

        self.engine.registry.dep_mut(id).state = BuildState::Building;

        let outcome = self.tracked("build/dep", data, mute, |cx| {
            cx.progress("actual_target", fqn.clone());
            let mut inner = Ctx::new(&mut *cx.engine, Some(id), inherited);
            match builder {
                Some(build) => build(&mut inner),
                None => Ok(Resolved::Dep(id)),
            }
        });

        let (state, result) = match outcome {
            Ok(Tracked::Done(result)) => (BuildState::Built(result.clone()), Ok(result)),
            Ok(Tracked::Stopped) => (BuildState::Built(Resolved::Dep(id)), Ok(Resolved::Dep(id))),
            Ok(Tracked::Muted(message)) => (BuildState::Failed(message), Ok(Resolved::Nothing)),
            Err(err) => (BuildState::Failed(err.to_string()), Err(err)),
        };
        self.engine.registry.dep_mut(id).state = state;
        result
    }

    // ========================================================================
    // Built-in actions
    // ========================================================================

    /// Request another dep. `./` specs resolve against the caller's unit.
    pub fn dep(&mut self, spec: &str) -> Result<Resolved> {
        match self.call("use/dep", &Args::new().arg(spec))? {
            Outcome::Resolved(resolved) => Ok(resolved),
            _ => Ok(Resolved::Nothing),
        }
    }

    /// Merge values into the caller's scope; strings become deferred
    /// templates when they contain template syntax.
    pub fn conf(&mut self, values: Map<String, Value>) -> Result<()> {
        self.call("use/conf", &Args::new().with_named(values))?;
        Ok(())
    }

    pub fn ensure_dirs<S: AsRef<str>>(&mut self, dirs: &[S]) -> Result<Vec<PathBuf>> {
        let args = dirs
            .iter()
            .fold(Args::new(), |args, d| args.arg(d.as_ref()));
        Ok(match self.call("use/dirs", &args)? {
            Outcome::Resolved(Resolved::Value(Value::Array(items))) => items
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect(),
            _ => Vec::new(),
        })
    }

    pub fn render_str(&mut self, template: &str, extra: Map<String, Value>) -> Result<String> {
        let args = Args::new().arg(template).with_named(extra);
        Ok(match self.call("render/str", &args)? {
            Outcome::Text(text) => text,
            _ => String::new(),
        })
    }

    /// Render the file `src` (relative to the caller's unit when it exists
    /// there) into `dst`.
    pub fn render_file(
        &mut self,
        src: &str,
        dst: &str,
        extra: Map<String, Value>,
    ) -> Result<Option<PathBuf>> {
        let args = Args::new().kw("src", src).kw("dst", dst).with_named(extra);
        Ok(match self.call("render/file", &args)? {
            Outcome::Resolved(Resolved::Path(path)) => Some(path),
            _ => None,
        })
    }

    /// Run `cmd` with `sh -c`. A non-zero exit is a falsy result, not an
    /// error.
    pub fn run_shell(&mut self, cmd: &str, env: &BTreeMap<String, String>) -> Result<CommandResult> {
        let mut args = Args::new().arg(cmd);
        if !env.is_empty() {
            let env: Map<String, Value> = env
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            args = args.kw("env", Value::Object(env));
        }
        Ok(match self.call("run/sh", &args)? {
            Outcome::Command(result) => result,
            _ => CommandResult::muted(),
        })
    }

    /// [`Ctx::run_shell`] without extra environment.
    pub fn sh(&mut self, cmd: &str) -> Result<CommandResult> {
        self.run_shell(cmd, &BTreeMap::new())
    }

    /// [`Ctx::sh`] for a command that is already rendered; template syntax in
    /// it is passed to the shell untouched.
    pub fn sh_raw(&mut self, cmd: &str) -> Result<CommandResult> {
        let args = Args::new().arg(cmd).kw("raw", true);
        Ok(match self.call("run/sh", &args)? {
            Outcome::Command(result) => result,
            _ => CommandResult::muted(),
        })
    }

    /// Run `cmd` through sudo on a pseudo-terminal.
    pub fn run_privileged(&mut self, cmd: &str) -> Result<CommandResult> {
        Ok(match self.call("run/sudo", &Args::new().arg(cmd))? {
            Outcome::Command(result) => result,
            _ => CommandResult::muted(),
        })
    }
}
