//! Resolvers declared in the root unit as a pair of command templates.

use serde_json::{Map, Value};

use super::tool::{ToolResolver, tool_resolver};
use crate::manifest::CommandResolverDef;
use crate::types::InstallStatus;

/// `check` runs first when present; success means nothing to do. Otherwise
/// `install` runs. Both see `body`, `package` and `version`.
pub fn command_resolver(def: CommandResolverDef) -> ToolResolver {
    let name = def.name.clone();
    tool_resolver(&name, move |cx, spec| {
        let (package, version) = spec.package();
        let mut vars = Map::new();
        vars.insert("body".into(), Value::String(spec.body.clone()));
        vars.insert("package".into(), Value::String(package.to_string()));
        vars.insert(
            "version".into(),
            Value::String(version.unwrap_or_default().to_string()),
        );

        if let Some(check) = &def.check {
            let cmd = cx.render_str(check, vars.clone())?;
            if cx.sh_raw(&cmd)?.success() {
                return Ok(InstallStatus::Unchanged);
            }
        }

        let cmd = cx.render_str(&def.install, vars)?;
        Ok(if cx.sh_raw(&cmd)?.success() {
            InstallStatus::Installed
        } else {
            InstallStatus::Failed
        })
    })
}
