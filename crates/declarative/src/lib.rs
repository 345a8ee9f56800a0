//! # Declarative
//!
//! Declarative build targets resolved into a memoized dependency graph.
//!
//! A target is named by a spec such as `//shell/zsh:plugins` or
//! `brew::ripgrep`. Resolvers turn specs into deps, each dep builds at most
//! once per invocation, and every step a target takes is a tracked action
//! that reports its progress as `optrace` events.
//!
//! ## Core Concepts
//!
//! - **Spec**: parsed `[resolver::]body[?k=v]` string; identity is the fqn
//! - **Scope**: layered key/value store with deferred template values
//! - **Resolver**: claims specs of one shape and builds deps for them
//! - **Dep**: graph node with its own scope, actions and build state
//! - **Action**: a function wrapped by [`track`] so each call becomes an
//!   operation
//! - **Ctx**: execution context threaded through target code and actions
//!
//! ## Example
//!
//! ```
//! use std::rc::Rc;
//! use declarative::{Engine, EngineOptions, Manifest, MemoryLoader, Target};
//! use optrace::NullSink;
//! use serde_json::{Map, json};
//!
//! let root = Manifest::new().with_target(
//!     "a",
//!     Target::native(|cx| {
//!         let mut values = Map::new();
//!         values.insert("greeting".into(), json!("hello {{ who }}"));
//!         values.insert("who".into(), json!("world"));
//!         cx.conf(values)
//!     }),
//! );
//! let loader = MemoryLoader::new(".").with_unit("", root);
//! let mut engine = Engine::new(EngineOptions::default(), Rc::new(loader), Box::new(NullSink));
//!
//! engine.run(&["//:a"])?;
//! let a = engine.find_dep("conf:::a").unwrap();
//! assert_eq!(engine.get(a, "greeting")?, json!("hello world"));
//! # Ok::<(), declarative::BuildError>(())
//! ```

pub mod action;
pub mod actions;
pub mod command;
pub mod context;
pub mod dep;
pub mod engine;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod resolvers;
pub mod scope;
pub mod spec;
pub mod template;
pub mod types;

// Re-export main types at crate root
pub use action::{Action, ActionTable, Args, track};
pub use actions::{default_actions, expand_path};
pub use command::{CommandEvent, SUDO_PROMPT_MARKER, exit_code, run_privileged, run_shell};
pub use context::Ctx;
pub use dep::{BuildState, Dep, DepId, UiOptions};
pub use engine::Engine;
pub use error::{BuildError, Result};
pub use loader::{DefinitionLoader, MemoryLoader, TomlLoader};
pub use manifest::{CommandResolverDef, EntryPoint, Manifest, Step, Target};
pub use registry::{Registry, Resolver};
pub use resolvers::{ROOT_SPEC, tool_resolver};
pub use scope::{Cell, ScopeId, Scopes, has_template, is_template};
pub use spec::{Spec, is_relative, rewrite_relative};
pub use types::{CommandResult, EngineOptions, InstallStatus, Outcome, Resolved};
