//! Resolver chain and the dep arena.
//!
//! The registry owns every [`Dep`] created during an invocation, keyed by
//! fqn, so at-most-once construction is a property of one map rather than
//! of each resolver.

use std::collections::HashMap;
use std::rc::Rc;

use crate::context::Ctx;
use crate::dep::{Dep, DepId};
use crate::engine::Engine;
use crate::error::Result;
use crate::scope::ScopeId;
use crate::types::Resolved;

/// Maps specs of a recognized shape to resolved behavior.
///
/// Resolvers are consulted in registration order; the first one whose
/// `can_resolve` returns true handles the spec.
pub trait Resolver {
    /// Name used in logs and for plugin lookup
    fn name(&self) -> &str;

    /// Whether this resolver claims `raw`. Must not have side effects.
    fn can_resolve(&self, engine: &Engine, raw: &str, scope: ScopeId) -> bool;

    /// Resolve `raw` on behalf of the requesting `scope`.
    fn resolve(&self, cx: &mut Ctx<'_>, raw: &str, scope: ScopeId) -> Result<Resolved>;
}

#[derive(Default)]
pub struct Registry {
    resolvers: Vec<Rc<dyn Resolver>>,
    deps: Vec<Dep>,
    by_fqn: HashMap<String, DepId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Rc<dyn Resolver>) {
        log::debug!("Registering resolver `{}`", resolver.name());
        self.resolvers.push(resolver);
    }

    /// Snapshot of the chain, so dispatch can hand the engine to a resolver.
    pub fn resolvers(&self) -> Vec<Rc<dyn Resolver>> {
        self.resolvers.clone()
    }

    pub fn resolver_names(&self) -> Vec<String> {
        self.resolvers.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn find(&self, fqn: &str) -> Option<DepId> {
        self.by_fqn.get(fqn).copied()
    }

    /// Add a dep, or return the one already registered under its fqn.
    pub fn insert(&mut self, dep: Dep) -> DepId {
        let fqn = dep.fqn();
        if let Some(id) = self.find(&fqn) {
            return id;
        }
        let id = DepId(self.deps.len());
        self.deps.push(dep);
        self.by_fqn.insert(fqn, id);
        id
    }

    /// Existing dep for `fqn`, or the one `create` builds.
    pub fn get_or_create(&mut self, fqn: &str, create: impl FnOnce() -> Dep) -> DepId {
        match self.find(fqn) {
            Some(id) => id,
            None => self.insert(create()),
        }
    }

    pub fn dep(&self, id: DepId) -> &Dep {
        &self.deps[id.0]
    }

    pub fn dep_mut(&mut self, id: DepId) -> &mut Dep {
        &mut self.deps[id.0]
    }

    pub fn deps(&self) -> impl Iterator<Item = (DepId, &Dep)> {
        self.deps.iter().enumerate().map(|(i, d)| (DepId(i), d))
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}
