//! Python applications through pipx: `pipx::black`, `pipx::black@24.1.0`.

use serde_json::Value;

use super::tool::{ToolResolver, tool_resolver};
use crate::context::Ctx;
use crate::error::Result;
use crate::spec::Spec;
use crate::types::InstallStatus;

pub fn pipx() -> ToolResolver {
    tool_resolver("pipx", install)
}

/// Installed version of `package` from `pipx list --json`.
pub fn parse_installed(json: &str, package: &str) -> Option<String> {
    let list: Value = serde_json::from_str(json).ok()?;
    list.get("venvs")?
        .get(package)?
        .pointer("/metadata/main_package/package_version")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn install(cx: &mut Ctx<'_>, spec: &Spec) -> Result<InstallStatus> {
    let (package, version) = spec.package();

    let listing = cx.sh("pipx list --json 2>/dev/null")?;
    let current = if listing.success() {
        parse_installed(&listing.output(), package)
    } else {
        None
    };
    if let Some(current) = &current {
        cx.progress("installed_version", current.clone());
    }

    let cmd = match (current.as_deref(), version) {
        (Some(_), None) => return Ok(InstallStatus::Unchanged),
        (Some(have), Some(want)) if have == want => return Ok(InstallStatus::Unchanged),
        (Some(_), Some(want)) => format!("pipx install --force {package}=={want}"),
        (None, Some(want)) => format!("pipx install {package}=={want}"),
        (None, None) => format!("pipx install {package}"),
    };

    Ok(if cx.sh(&cmd)?.success() {
        InstallStatus::Installed
    } else {
        InstallStatus::Failed
    })
}
