//! Graph nodes.

use std::path::PathBuf;
use std::rc::Rc;

use crate::action::{Action, ActionTable};
use crate::context::Ctx;
use crate::error::Result;
use crate::scope::ScopeId;
use crate::spec::Spec;
use crate::types::Resolved;

/// Index of a dep in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(pub(crate) usize);

/// Build logic of a dep. Runs at most once.
pub type BuildFn = Rc<dyn Fn(&mut Ctx<'_>) -> Result<Resolved>>;

/// Build lifecycle; only ever moves forward.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildState {
    Unbuilt,
    Building,
    Built(Resolved),
    Failed(String),
}

/// Presentation hints forwarded to observers.
#[derive(Debug, Clone, Default)]
pub struct UiOptions {
    /// Render the build operation's children in place of the operation itself
    pub hidden: bool,
}

/// One node of the dependency graph.
pub struct Dep {
    pub spec: Spec,
    pub scope: ScopeId,
    pub actions: ActionTable,
    pub failsafe: bool,
    pub ui: UiOptions,
    /// Declaring unit's directory under the configs root; `./` specs
    /// requested by this dep resolve against it
    pub base: String,
    pub config_dir: Option<PathBuf>,
    pub(crate) root: bool,
    pub(crate) state: BuildState,
    pub(crate) builder: Option<BuildFn>,
}

impl Dep {
    pub fn new(spec: Spec, scope: ScopeId) -> Self {
        Self {
            spec,
            scope,
            actions: ActionTable::new(),
            failsafe: false,
            ui: UiOptions::default(),
            base: String::new(),
            config_dir: None,
            root: false,
            state: BuildState::Unbuilt,
            builder: None,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.insert(action);
        self
    }

    pub fn with_failsafe(mut self, failsafe: bool) -> Self {
        self.failsafe = failsafe;
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.ui.hidden = hidden;
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    pub fn with_config_dir(mut self, dir: PathBuf) -> Self {
        self.config_dir = Some(dir);
        self
    }

    pub fn with_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&mut Ctx<'_>) -> Result<Resolved> + 'static,
    {
        self.builder = Some(Rc::new(builder));
        self
    }

    /// The root dep owns the global scope, and its failsafe flag does not
    /// spread to the deps it requests.
    pub(crate) fn as_root(mut self) -> Self {
        self.root = true;
        self
    }

    pub fn fqn(&self) -> String {
        self.spec.fqn()
    }

    pub fn state(&self) -> &BuildState {
        &self.state
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn is_built(&self) -> bool {
        matches!(self.state, BuildState::Built(_))
    }

    pub fn get_action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }
}
