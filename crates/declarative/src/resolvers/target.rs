//! File-target resolver: `//dir:entry` specs backed by build units.

use serde_json::{Map, Value};

use crate::context::Ctx;
use crate::dep::Dep;
use crate::engine::Engine;
use crate::error::{BuildError, Result};
use crate::registry::Resolver;
use crate::scope::ScopeId;
use crate::spec::Spec;
use crate::types::Resolved;

/// Fqn of the root unit's main entry.
pub const ROOT_SPEC: &str = "conf:::main";

pub const RESOLVER_NAME: &str = "conf";

/// Split a target body into unit directory and optional entry name.
///
/// `//shell/zsh:plugins`, `shell/zsh:plugins`, `shell/zsh` and `:main` are
/// all accepted.
pub fn split_body(body: &str) -> (String, Option<String>) {
    let body = body.trim_start_matches('/');
    match body.rsplit_once(':') {
        Some((unit, entry)) => (unit.trim_end_matches('/').to_string(), Some(entry.to_string())),
        None => (body.trim_end_matches('/').to_string(), None),
    }
}

#[derive(Debug, Default)]
pub struct TargetResolver;

impl Resolver for TargetResolver {
    fn name(&self) -> &str {
        RESOLVER_NAME
    }

    fn can_resolve(&self, engine: &Engine, raw: &str, _scope: ScopeId) -> bool {
        let spec = Spec::parse(raw, &engine.options.default_resolver);
        if spec.resolver != RESOLVER_NAME {
            return false;
        }
        spec.explicit || engine.loader.exists(&split_body(&spec.body).0)
    }

    fn resolve(&self, cx: &mut Ctx<'_>, raw: &str, scope: ScopeId) -> Result<Resolved> {
        let spec = Spec::parse(raw, &cx.engine.options.default_resolver);
        let (unit, explicit) = split_body(&spec.body);

        let loader = std::rc::Rc::clone(&cx.engine.loader);
        let manifest = loader.load(&unit)?;
        let entry = manifest.select_entry(&unit, explicit.as_deref());
        let canonical = spec.with_body(format!("{unit}:{entry}"));
        let fqn = canonical.fqn();

        if let Some(id) = cx.engine.registry.find(&fqn) {
            return cx.build(id);
        }

        let is_root = fqn == ROOT_SPEC;
        let target = manifest.target(&entry);
        let failsafe = is_root || target.is_some_and(|t| t.failsafe);
        let hidden = is_root || target.is_some_and(|t| t.hidden);
        let config_dir = loader.config_dir(&unit);

        let dep_scope = if is_root {
            cx.engine.global
        } else {
            cx.engine.scopes.child(scope, Map::new())
        };

        let params = canonical.params.clone();
        let seed_dir = config_dir.display().to_string();
        let seed_fqn = fqn.clone();
        let dep = Dep::new(canonical, dep_scope)
            .with_failsafe(failsafe)
            .with_hidden(hidden)
            .with_base(unit.clone())
            .with_config_dir(config_dir)
            .with_builder(move |cx| {
                let mut seed = manifest.vars.clone();
                seed.insert("current_config_dir".into(), Value::String(seed_dir.clone()));
                seed.insert("fqn".into(), Value::String(seed_fqn.clone()));
                seed.insert("target_name".into(), Value::String(entry.clone()));
                for (key, value) in &params {
                    seed.insert(key.clone(), Value::String(value.clone()));
                }
                cx.conf(seed)?;

                match manifest.target(&entry) {
                    Some(target) => target.run(cx)?,
                    None if is_root => {}
                    None => {
                        return Err(BuildError::target(format!(
                            "unit `//{unit}` has no target `{entry}`"
                        )));
                    }
                }
                Ok(cx.caller().map_or(Resolved::Nothing, Resolved::Dep))
            });
        let dep = if is_root { dep.as_root() } else { dep };

        let id = cx.engine.registry.insert(dep);
        cx.build(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_body_forms() {
        assert_eq!(split_body("//shell/zsh:plugins"), ("shell/zsh".into(), Some("plugins".into())));
        assert_eq!(split_body("shell/zsh"), ("shell/zsh".into(), None));
        assert_eq!(split_body("//:a"), (String::new(), Some("a".into())));
        assert_eq!(split_body(":main"), (String::new(), Some("main".into())));
        assert_eq!(split_body("/"), (String::new(), None));
    }

    #[test]
    fn test_root_spec_is_canonical() {
        let spec = Spec::parse(ROOT_SPEC, "conf");
        assert_eq!(split_body(&spec.body), (String::new(), Some("main".into())));
        assert_eq!(spec.with_body(":main").fqn(), ROOT_SPEC);
    }
}
