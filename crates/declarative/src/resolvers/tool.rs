//! Generic wrapper turning a function into a one-action resolver.

use std::rc::Rc;

use serde_json::Map;

use crate::action::{Args, track};
use crate::context::Ctx;
use crate::dep::Dep;
use crate::engine::Engine;
use crate::error::Result;
use crate::registry::Resolver;
use crate::scope::ScopeId;
use crate::spec::Spec;
use crate::types::{InstallStatus, Outcome, Resolved};

pub type ToolFn = Rc<dyn Fn(&mut Ctx<'_>, &Spec) -> Result<InstallStatus>>;

/// Claims `name::...` specs. Each fqn gets a dep with a single tracked
/// action `run/<name>`; building the dep runs it once.
pub struct ToolResolver {
    name: String,
    func: ToolFn,
}

pub fn tool_resolver<F>(name: &str, func: F) -> ToolResolver
where
    F: Fn(&mut Ctx<'_>, &Spec) -> Result<InstallStatus> + 'static,
{
    ToolResolver {
        name: name.to_string(),
        func: Rc::new(func),
    }
}

impl ToolResolver {
    fn action_name(&self) -> String {
        format!("run/{}", self.name)
    }
}

impl Resolver for ToolResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_resolve(&self, engine: &Engine, raw: &str, _scope: ScopeId) -> bool {
        Spec::parse(raw, &engine.options.default_resolver).resolver == self.name
    }

    fn resolve(&self, cx: &mut Ctx<'_>, raw: &str, scope: ScopeId) -> Result<Resolved> {
        let spec = Spec::parse(raw, &cx.engine.options.default_resolver);
        let fqn = spec.fqn();
        let kind = self.action_name();

        let id = match cx.engine.registry.find(&fqn) {
            Some(id) => id,
            None => {
                let dep_scope = cx.engine.scopes.child(scope, Map::new());
                let func = Rc::clone(&self.func);
                let bound = spec.clone();
                let action = track(&kind, move |cx, _args| {
                    let status = func(cx, &bound)?;
                    cx.progress("status", status.as_str());
                    if !status.is_success() {
                        log::warn!("{} reported failure", bound.fqn());
                    }
                    Ok(Outcome::Resolved(Resolved::Status(status)))
                });

                let (package, version) = spec.package();
                let mut args = Args::new().kw("package", package);
                if let Some(version) = version {
                    args = args.kw("version", version);
                }
                let dep = Dep::new(spec.clone(), dep_scope)
                    .with_action(action)
                    .with_builder(move |cx| match cx.call(&kind, &args)? {
                        Outcome::Resolved(resolved) => Ok(resolved),
                        _ => Ok(Resolved::Nothing),
                    });
                cx.engine.registry.insert(dep)
            }
        };
        cx.build(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::types::EngineOptions;
    use optrace::{Event, MemorySink};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::cell::Cell;

    #[test]
    fn test_tool_runs_once_per_fqn() {
        let sink = MemorySink::new();
        let mut engine = Engine::new(
            EngineOptions::default(),
            Rc::new(MemoryLoader::new(".")),
            Box::new(sink.clone()),
        );
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        engine.register_resolver(Rc::new(tool_resolver("fake", move |_cx, spec| {
            counter.set(counter.get() + 1);
            assert_eq!(spec.package(), ("thing", Some("1.0")));
            Ok(InstallStatus::Installed)
        })));

        let first = engine.resolve("fake::thing@1.0").unwrap();
        let second = engine.resolve("fake::thing@1.0").unwrap();
        assert_eq!(first, Resolved::Status(InstallStatus::Installed));
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);

        let statuses: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress { op, data, .. } if op == "run/fake" => data.get("status").cloned(),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![Value::from("installed")]);
    }
}
