//! Tracked actions.
//!
//! An [`Action`] is a plain function wrapped by [`track`]: every call opens
//! an operation, reports the captured arguments as its data, runs the
//! function, and closes the operation with the real outcome.

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::context::Ctx;
use crate::error::{BuildError, Result};
use crate::types::Outcome;

/// Call arguments: positional values plus named values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub named: Map<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kw(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.named.insert(key.to_string(), value.into());
        self
    }

    pub fn with_named(mut self, named: Map<String, Value>) -> Self {
        self.named.extend(named);
        self
    }

    /// Positional `index`, falling back to the named `name`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.named.get(name))
    }

    /// Required string argument.
    pub fn str(&self, action: &str, index: usize, name: &str) -> Result<String> {
        match self.get(index, name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(BuildError::invalid_args(
                action,
                format!("`{name}` must be a string, got {other}"),
            )),
            None => Err(BuildError::invalid_args(action, format!("missing `{name}`"))),
        }
    }

    /// Named values except `skip`.
    pub fn rest(&self, skip: &[&str]) -> Map<String, Value> {
        self.named
            .iter()
            .filter(|(k, _)| !skip.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Every string among the positional values, flattening arrays.
    pub fn strings(&self) -> Vec<String> {
        fn collect(value: &Value, out: &mut Vec<String>) {
            match value {
                Value::String(s) => out.push(s.clone()),
                Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
                _ => {}
            }
        }
        let mut out = Vec::new();
        self.positional.iter().for_each(|v| collect(v, &mut out));
        out
    }

    /// Default report of a call's arguments.
    pub fn to_data(&self) -> Map<String, Value> {
        let mut data = self.named.clone();
        if !self.positional.is_empty() {
            data.insert("args".to_string(), Value::Array(self.positional.clone()));
        }
        data
    }
}

pub type ActionFn = Rc<dyn Fn(&mut Ctx<'_>, &Args) -> Result<Outcome>>;
pub type CaptureFn = Rc<dyn Fn(&Args) -> Map<String, Value>>;

/// A named, tracked build step.
#[derive(Clone)]
pub struct Action {
    name: String,
    aliases: Vec<String>,
    capture: CaptureFn,
    func: ActionFn,
    failsafe: bool,
}

/// Wrap `func` as a tracked action reported under the operation kind `name`.
pub fn track<F>(name: &str, func: F) -> Action
where
    F: Fn(&mut Ctx<'_>, &Args) -> Result<Outcome> + 'static,
{
    Action {
        name: name.to_string(),
        aliases: Vec::new(),
        capture: Rc::new(Args::to_data),
        func: Rc::new(func),
        failsafe: false,
    }
}

impl Action {
    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    /// Compute the reported data from the call arguments.
    pub fn capture<C>(mut self, capture: C) -> Self
    where
        C: Fn(&Args) -> Map<String, Value> + 'static,
    {
        self.capture = Rc::new(capture);
        self
    }

    /// Failures of a failsafe action are reported and then muted.
    pub fn failsafe(mut self, failsafe: bool) -> Self {
        self.failsafe = failsafe;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn is_failsafe(&self) -> bool {
        self.failsafe
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    pub(crate) fn data(&self, args: &Args) -> Map<String, Value> {
        (self.capture)(args)
    }

    pub(crate) fn run(&self, cx: &mut Ctx<'_>, args: &Args) -> Result<Outcome> {
        (self.func)(cx, args)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("failsafe", &self.failsafe)
            .finish_non_exhaustive()
    }
}

/// Actions callable on a dep, looked up by name or alias.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    actions: Vec<Action>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action, replacing one with the same name.
    pub fn insert(&mut self, action: Action) {
        self.actions.retain(|a| a.name != action.name);
        self.actions.push(action);
    }

    pub fn with(mut self, action: Action) -> Self {
        self.insert(action);
        self
    }

    /// Exact names win over aliases.
    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .or_else(|| self.actions.iter().find(|a| a.matches(name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl FromIterator<Action> for ActionTable {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut table = Self::new();
        for action in iter {
            table.insert(action);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn noop(name: &str) -> Action {
        track(name, |_, _| Ok(Outcome::None))
    }

    #[test]
    fn test_lookup_by_name_or_alias() {
        let table: ActionTable = [noop("run/sh").alias("sh").alias("run_shell"), noop("use/dep")]
            .into_iter()
            .collect();

        assert_eq!(table.get("run/sh").map(Action::name), Some("run/sh"));
        assert_eq!(table.get("run_shell").map(Action::name), Some("run/sh"));
        assert!(table.get("render").is_none());
    }

    #[test]
    fn test_insert_replaces_same_name() {
        let mut table = ActionTable::new();
        table.insert(noop("run/x"));
        table.insert(noop("run/x").failsafe(true));
        assert_eq!(table.len(), 1);
        assert!(table.get("run/x").unwrap().is_failsafe());
    }

    #[test]
    fn test_args_accessors() {
        let args = Args::new()
            .arg("echo hi")
            .arg(json!(["a", ["b"]]))
            .kw("env", json!({"X": "1"}));

        assert_eq!(args.str("run/sh", 0, "cmd").unwrap(), "echo hi");
        assert!(args.str("run/sh", 5, "missing").is_err());
        assert_eq!(args.strings(), vec!["echo hi", "a", "b"]);
        assert_eq!(args.to_data()["env"], json!({"X": "1"}));
        assert!(args.rest(&["env"]).is_empty());
    }

    #[test]
    fn test_named_fallback() {
        let args = Args::new().kw("spec", "//:a");
        assert_eq!(args.str("use/dep", 0, "spec").unwrap(), "//:a");
    }
}
