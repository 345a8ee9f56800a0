//! Built-in resolvers.

mod brew;
mod command;
mod path;
mod pipx;
mod pyenv;
mod target;
mod tool;

use std::rc::Rc;

use crate::registry::Resolver;

pub use brew::brew;
pub use command::command_resolver;
pub use path::PathResolver;
pub use pipx::pipx;
pub use pyenv::pyenv;
pub use target::{ROOT_SPEC, TargetResolver, split_body};
pub use tool::{ToolFn, ToolResolver, tool_resolver};

/// Tool resolver enabled by name from the root unit's `plugins` list.
pub fn plugin(name: &str) -> Option<Rc<dyn Resolver>> {
    let resolver: Rc<dyn Resolver> = match name {
        "brew" => Rc::new(brew()),
        "pipx" => Rc::new(pipx()),
        "pyenv" => Rc::new(pyenv()),
        _ => return None,
    };
    Some(resolver)
}
