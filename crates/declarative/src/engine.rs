//! The engine: one invocation's registry, scopes and operation tracker.

use std::rc::Rc;

use optrace::{EventSink, OpsTracker};
use serde_json::{Map, Value};

use crate::action::ActionTable;
use crate::actions::default_actions;
use crate::context::Ctx;
use crate::dep::{Dep, DepId};
use crate::error::{BuildError, Result};
use crate::loader::{DefinitionLoader, TomlLoader};
use crate::registry::{Registry, Resolver};
use crate::resolvers::{self, PathResolver, ROOT_SPEC, TargetResolver, command_resolver};
use crate::scope::{ScopeId, Scopes};
use crate::types::{EngineOptions, Resolved};

/// Owns everything that lives for one build invocation.
///
/// The graph is walked synchronously on the calling thread; requesting a
/// dependency blocks until that dependency has finished building.
pub struct Engine {
    pub(crate) options: EngineOptions,
    pub(crate) scopes: Scopes,
    pub(crate) registry: Registry,
    pub(crate) tracker: OpsTracker,
    pub(crate) loader: Rc<dyn DefinitionLoader>,
    pub(crate) global: ScopeId,
    pub(crate) defaults: ActionTable,
    pub(crate) renders: u64,
    ready: bool,
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        loader: Rc<dyn DefinitionLoader>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let mut scopes = Scopes::new();
        let global = scopes.root();
        Self {
            options,
            scopes,
            registry: Registry::new(),
            tracker: OpsTracker::new(sink),
            loader,
            global,
            defaults: default_actions(),
            renders: 0,
            ready: false,
        }
    }

    /// Engine reading build units from `options.root`.
    pub fn with_toml_loader(options: EngineOptions, sink: Box<dyn EventSink>) -> Self {
        let loader = Rc::new(TomlLoader::new(
            options.root.clone(),
            options.build_file.clone(),
        ));
        Self::new(options, loader, sink)
    }

    /// Register the built-in resolvers, then whatever the root unit asks for.
    /// Runs once; later calls are no-ops.
    pub fn setup(&mut self) -> Result<()> {
        if self.ready {
            return Ok(());
        }
        self.ready = true;

        self.registry.register(Rc::new(PathResolver::path()));
        self.registry.register(Rc::new(PathResolver::dir()));
        self.registry.register(Rc::new(TargetResolver));

        if !self.loader.exists("") {
            log::debug!("No root unit under {}", self.options.root.display());
            return Ok(());
        }

        let root = self.loader.load("")?;
        for name in &root.plugins {
            let resolver = resolvers::plugin(name).ok_or_else(|| BuildError::Manifest {
                unit: "//".to_string(),
                message: format!("unknown plugin `{name}`"),
            })?;
            self.registry.register(resolver);
        }
        for def in &root.resolvers {
            self.registry.register(Rc::new(command_resolver(def.clone())));
        }
        for factory in &root.resolver_factories {
            self.registry.register(factory());
        }
        Ok(())
    }

    /// Build the root unit (when there is one) and then every spec, in
    /// order, under a single `build/specs` operation.
    pub fn run<S: AsRef<str>>(&mut self, specs: &[S]) -> Result<()> {
        let specs: Vec<String> = specs.iter().map(|s| s.as_ref().to_string()).collect();
        let mut data = Map::new();
        data.insert(
            "specs".into(),
            Value::Array(specs.iter().cloned().map(Value::String).collect()),
        );

        let has_root = self.loader.exists("");
        let global = self.global;
        let mut cx = self.ctx();
        // Setup runs inside the operation so a broken root unit is reported
        // as its error rather than only in the exit code.
        cx.tracked("build/specs", data, false, |cx| {
            cx.engine.setup()?;
            if has_root {
                cx.resolve(ROOT_SPEC, global)?;
            }
            for spec in &specs {
                cx.dep(spec)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Resolve one spec at global level.
    pub fn resolve(&mut self, raw: &str) -> Result<Resolved> {
        self.setup()?;
        let global = self.global;
        self.ctx().resolve(raw, global)
    }

    /// Context for calls made at global level.
    pub fn ctx(&mut self) -> Ctx<'_> {
        Ctx::new(self, None, false)
    }

    pub fn register_resolver(&mut self, resolver: Rc<dyn Resolver>) {
        self.registry.register(resolver);
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn loader(&self) -> &Rc<dyn DefinitionLoader> {
        &self.loader
    }

    pub fn global_scope(&self) -> ScopeId {
        self.global
    }

    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    pub fn find_dep(&self, fqn: &str) -> Option<DepId> {
        self.registry.find(fqn)
    }

    pub fn dep(&self, id: DepId) -> &Dep {
        self.registry.dep(id)
    }

    pub fn deps(&self) -> impl Iterator<Item = (DepId, &Dep)> {
        self.registry.deps()
    }

    /// Read `key` from a dep's scope.
    pub fn get(&mut self, id: DepId, key: &str) -> Result<Value> {
        self.ctx().with_caller(id, |cx| cx.get(key))
    }

    /// Text a resolved value stands for inside templates.
    pub fn display(&self, resolved: &Resolved) -> String {
        match resolved {
            Resolved::Dep(id) => self.registry.dep(*id).fqn(),
            Resolved::Path(path) => path.display().to_string(),
            Resolved::Status(status) => status.to_string(),
            Resolved::Value(Value::String(s)) => s.clone(),
            Resolved::Value(value) => value.to_string(),
            Resolved::Nothing => String::new(),
        }
    }

    /// Number of template renders so far.
    pub fn templates_rendered(&self) -> u64 {
        self.renders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::manifest::{CommandResolverDef, Manifest};
    use optrace::NullSink;

    fn engine(loader: MemoryLoader) -> Engine {
        Engine::new(EngineOptions::default(), Rc::new(loader), Box::new(NullSink))
    }

    #[test]
    fn test_setup_registers_root_resolvers_in_order() {
        let root = Manifest::new()
            .with_plugin("pipx")
            .with_command_resolver(CommandResolverDef {
                name: "npm".into(),
                check: None,
                install: "npm install -g {{ body }}".into(),
            });
        let mut engine = engine(MemoryLoader::new(".").with_unit("", root));
        engine.setup().unwrap();
        engine.setup().unwrap();

        assert_eq!(
            engine.registry.resolver_names(),
            vec!["path", "dir", "conf", "pipx", "npm"]
        );
    }

    #[test]
    fn test_unknown_plugin_is_rejected() {
        let root = Manifest::new().with_plugin("apt");
        let mut engine = engine(MemoryLoader::new(".").with_unit("", root));
        assert!(engine.setup().is_err());
    }

    #[test]
    fn test_unclaimed_spec() {
        let mut engine = engine(MemoryLoader::new("."));
        let err = engine.resolve("nope::x").unwrap_err();
        assert!(matches!(err, BuildError::NoResolverFound { .. }));
    }

    #[test]
    fn test_command_resolver_output_is_not_rendered_twice() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let root = Manifest::new().with_command_resolver(CommandResolverDef {
            name: "mark".into(),
            check: None,
            install: "printf '%s' '{{ \"{{ kept }}\" }}' > {{ body }}".into(),
        });
        let mut engine = engine(MemoryLoader::new(".").with_unit("", root));

        engine.resolve(&format!("mark::{}", out.display())).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "{{ kept }}");
    }
}
