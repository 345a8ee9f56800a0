//! `path::` and `dir::` resolvers.

use serde_json::{Map, Value};

use crate::action::{Args, track};
use crate::actions::expand_path;
use crate::context::Ctx;
use crate::dep::Dep;
use crate::engine::Engine;
use crate::error::{BuildError, Result};
use crate::registry::Resolver;
use crate::scope::ScopeId;
use crate::spec::Spec;
use crate::types::{Outcome, Resolved};

/// Ensures a filesystem location exists and resolves to it.
///
/// `path::` creates the parent directory, `dir::` the directory itself.
/// Both need the explicit prefix.
#[derive(Debug)]
pub struct PathResolver {
    name: &'static str,
    whole: bool,
}

impl PathResolver {
    pub fn path() -> Self {
        Self {
            name: "path",
            whole: false,
        }
    }

    pub fn dir() -> Self {
        Self {
            name: "dir",
            whole: true,
        }
    }
}

fn mkpath(whole: bool) -> impl Fn(&mut Ctx<'_>, &Args) -> Result<Outcome> {
    move |_cx: &mut Ctx<'_>, args: &Args| {
        let path = expand_path(&args.str("mkpath", 0, "path")?);
        let dir = if whole { Some(path.as_path()) } else { path.parent() };
        if let Some(dir) = dir.filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| BuildError::io(format!("creating {}", dir.display()), e))?;
        }
        Ok(Outcome::Resolved(Resolved::Path(path)))
    }
}

impl Resolver for PathResolver {
    fn name(&self) -> &str {
        self.name
    }

    fn can_resolve(&self, engine: &Engine, raw: &str, _scope: ScopeId) -> bool {
        let spec = Spec::parse(raw, &engine.options.default_resolver);
        spec.explicit && spec.resolver == self.name
    }

    fn resolve(&self, cx: &mut Ctx<'_>, raw: &str, scope: ScopeId) -> Result<Resolved> {
        let spec = Spec::parse(raw, &cx.engine.options.default_resolver);
        let path = expand_path(&spec.body).display().to_string();
        let canonical = spec.with_body(path.clone());
        let whole = self.whole;

        let id = cx.engine.registry.get_or_create(&canonical.fqn(), || {
            Dep::new(canonical, scope)
                .with_hidden(true)
                .with_action(track("mkpath", mkpath(whole)).capture(|args| {
                    let mut data = Map::new();
                    if let Some(path) = args.get(0, "path") {
                        data.insert("path".into(), path.clone());
                    }
                    data
                }))
                .with_builder(move |cx| {
                    match cx.call("mkpath", &Args::new().arg(Value::String(path.clone())))? {
                        Outcome::Resolved(resolved) => Ok(resolved),
                        _ => Ok(Resolved::Nothing),
                    }
                })
        });
        cx.build(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::types::EngineOptions;
    use optrace::NullSink;
    use std::rc::Rc;

    #[test]
    fn test_path_and_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(
            EngineOptions::default(),
            Rc::new(MemoryLoader::new(".")),
            Box::new(NullSink),
        );
        engine.setup().unwrap();

        let file = tmp.path().join("a/b/file.txt");
        let resolved = engine.resolve(&format!("path::{}", file.display())).unwrap();
        assert_eq!(resolved, Resolved::Path(file.clone()));
        assert!(file.parent().unwrap().is_dir());
        assert!(!file.exists());

        let dir = tmp.path().join("c/d");
        engine.resolve(&format!("dir::{}", dir.display())).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_requires_prefix() {
        let engine = Engine::new(
            EngineOptions::default(),
            Rc::new(MemoryLoader::new(".")),
            Box::new(NullSink),
        );
        let scope = engine.global_scope();
        assert!(!PathResolver::dir().can_resolve(&engine, "/tmp/x", scope));
        assert!(PathResolver::dir().can_resolve(&engine, "dir::/tmp/x", scope));
        assert!(!PathResolver::path().can_resolve(&engine, "dir::/tmp/x", scope));
    }
}
