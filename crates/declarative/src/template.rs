//! Template rendering against scopes.
//!
//! Templates are MiniJinja. Variables are looked up in the scope chain on
//! demand, so only referenced keys are rendered. A `dep("spec")` function is
//! available inside templates. Rendering runs until no new spec shows up:
//! each pass records the specs it has not seen yet, those are resolved as
//! tracked dependencies, and the next pass sees their display values. A
//! `dep()` that only runs once another one returned something is picked up
//! on a later pass.

use std::collections::HashMap;
use std::sync::Arc;

use minijinja::{Environment, Error};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::context::Ctx;
use crate::error::{BuildError, Result};
use crate::scope::{Cell, ScopeId, is_template};

const TEMPLATE_NAME: &str = "<inline>";

fn environment<'s>() -> Environment<'s> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env
}

impl Ctx<'_> {
    /// Read `key` as seen from `scope`. A deferred value is rendered in the
    /// layer that owns it and replaced there, so it renders exactly once.
    /// Template strings nested in tables and arrays render the same way.
    pub fn lookup(&mut self, scope: ScopeId, key: &str) -> Result<Option<Value>> {
        let Some((owner, cell)) = self.engine.scopes.lookup(scope, key) else {
            return Ok(None);
        };

        match cell.clone() {
            Cell::Ready(value) => Ok(Some(value)),
            Cell::Rendering => Err(BuildError::target(format!(
                "`{key}` refers to itself while being rendered"
            ))),
            Cell::Deferred(source) => {
                self.engine.scopes.put(owner, key, Cell::Rendering);
                match self.render_value(source.clone(), owner) {
                    Ok(value) => {
                        self.engine.scopes.put(owner, key, Cell::Ready(value.clone()));
                        Ok(Some(value))
                    }
                    Err(err) => {
                        self.engine.scopes.put(owner, key, Cell::Deferred(source));
                        Err(err)
                    }
                }
            }
        }
    }

    /// Render every template string inside `value` against `scope`.
    fn render_value(&mut self, value: Value, scope: ScopeId) -> Result<Value> {
        Ok(match value {
            Value::String(s) if is_template(&s) => {
                Value::String(self.render_template(&s, scope, &Map::new())?)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.render_value(item, scope))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, self.render_value(v, scope)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other,
        })
    }

    /// Render `text` against the caller's scope if it contains template
    /// syntax; plain strings come back unchanged.
    pub fn render_inline(&mut self, text: &str) -> Result<String> {
        if is_template(text) {
            let scope = self.scope();
            self.render_template(text, scope, &Map::new())
        } else {
            Ok(text.to_string())
        }
    }

    /// Render `source` with variables from `scope`, overridden by `extra`.
    pub fn render_template(
        &mut self,
        source: &str,
        scope: ScopeId,
        extra: &Map<String, Value>,
    ) -> Result<String> {
        self.engine.renders += 1;

        let names = environment()
            .template_from_named_str(TEMPLATE_NAME, source)?
            .undeclared_variables(false);
        let mut vars = Map::new();
        for name in names {
            if name == "dep" {
                continue;
            }
            if let Some(value) = extra.get(&name) {
                vars.insert(name, value.clone());
            } else if let Some(value) = self.lookup(scope, &name)? {
                vars.insert(name, value);
            }
        }
        for (key, value) in extra {
            vars.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let resolved = Arc::new(Mutex::new(HashMap::<String, String>::new()));
        let requested = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut env = environment();
        {
            let resolved = Arc::clone(&resolved);
            let requested = Arc::clone(&requested);
            env.add_function("dep", move |spec: String| -> std::result::Result<String, Error> {
                if let Some(display) = resolved.lock().get(&spec) {
                    return Ok(display.clone());
                }
                requested.lock().push(spec);
                Ok(String::new())
            });
        }
        let template = env.template_from_named_str(TEMPLATE_NAME, source)?;

        loop {
            let text = template.render(&vars)?;
            let pending = std::mem::take(&mut *requested.lock());
            if pending.is_empty() {
                return Ok(text);
            }
            for spec in pending {
                if resolved.lock().contains_key(&spec) {
                    continue;
                }
                let result = self.dep(&spec)?;
                let display = self.engine.display(&result);
                resolved.lock().insert(spec, display);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::loader::MemoryLoader;
    use crate::types::EngineOptions;
    use optrace::NullSink;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, Value, json};
    use std::rc::Rc;

    fn engine() -> Engine {
        Engine::new(
            EngineOptions::default(),
            Rc::new(MemoryLoader::new(".")),
            Box::new(NullSink),
        )
    }

    fn conf(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_forward_reference_renders_once() {
        let mut engine = engine();
        let mut cx = engine.ctx();
        cx.conf(conf(&[("x", json!("{{ y }}"))])).unwrap();
        cx.conf(conf(&[("y", json!("1"))])).unwrap();
        let before = cx.engine().templates_rendered();

        assert_eq!(cx.get("x").unwrap(), json!("1"));
        assert_eq!(cx.get("x").unwrap(), json!("1"));
        assert_eq!(cx.engine().templates_rendered() - before, 1);
    }

    #[test]
    fn test_chained_deferred_values() {
        let mut engine = engine();
        let mut cx = engine.ctx();
        cx.conf(conf(&[
            ("greeting", json!("{{ salutation }}, {{ name }}")),
            ("salutation", json!("hi")),
            ("name", json!("{{ first }}")),
            ("first", json!("ada")),
        ]))
        .unwrap();

        assert_eq!(cx.get_str("greeting").unwrap(), "hi, ada");
    }

    #[test]
    fn test_self_reference_is_an_error() {
        let mut engine = engine();
        let mut cx = engine.ctx();
        cx.conf(conf(&[("loop", json!("{{ loop }}"))])).unwrap();
        assert!(cx.get("loop").is_err());
    }

    #[test]
    fn test_undefined_renders_empty_and_keeps_newline() {
        let mut engine = engine();
        let mut cx = engine.ctx();
        let text = cx.render_str("[{{ nope }}]\n", Map::new()).unwrap();
        assert_eq!(text, "[]\n");
    }

    #[test]
    fn test_extra_values_override_scope() {
        let mut engine = engine();
        let mut cx = engine.ctx();
        cx.conf(conf(&[("who", json!("scope"))])).unwrap();
        let text = cx
            .render_str("{{ who }}", conf(&[("who", json!("extra"))]))
            .unwrap();
        assert_eq!(text, "extra");
    }

    #[test]
    fn test_dep_function_resolves_inline() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cache");
        let mut engine = engine();
        engine.setup().unwrap();
        let mut cx = engine.ctx();

        let text = cx
            .render_str(
                &format!("dir={{{{ dep('dir::{}') }}}}", target.display()),
                Map::new(),
            )
            .unwrap();
        assert_eq!(text, format!("dir={}", target.display()));
        assert!(target.is_dir());
    }

    #[test]
    fn test_nested_conf_values_render_in_owner_scope() {
        let mut engine = engine();
        let mut cx = engine.ctx();
        cx.conf(conf(&[
            ("font", json!("Mono")),
            ("kitty", json!({"face": "{{ font }} 12", "size": 12, "extra": ["{{ font }}"]})),
        ]))
        .unwrap();

        assert_eq!(cx.render_str("{{ kitty['face'] }}", Map::new()).unwrap(), "Mono 12");
        assert_eq!(
            cx.get("kitty").unwrap(),
            json!({"face": "Mono 12", "size": 12, "extra": ["Mono"]})
        );
    }

    #[test]
    fn test_dep_behind_another_dep_is_collected() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        let mut engine = engine();
        engine.setup().unwrap();
        let mut cx = engine.ctx();

        let source = format!(
            "{{% if dep('dir::{}') %}}{{{{ dep('dir::{}') }}}}{{% endif %}}",
            first.display(),
            second.display()
        );
        let text = cx.render_str(&source, Map::new()).unwrap();
        assert_eq!(text, second.display().to_string());
        assert!(first.is_dir());
        assert!(second.is_dir());
    }
}
