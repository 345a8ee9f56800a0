//! Homebrew formulae and casks: `brew::ripgrep`, `brew::python@3.12`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use super::tool::{ToolResolver, tool_resolver};
use crate::context::Ctx;
use crate::error::Result;
use crate::spec::Spec;
use crate::types::InstallStatus;

type Installed = Rc<RefCell<Option<HashMap<String, Vec<String>>>>>;

pub fn brew() -> ToolResolver {
    let installed = Installed::default();
    tool_resolver("brew", move |cx, spec| install(cx, spec, &installed))
}

/// Parse `brew list --versions`: `name v1 v2` per line.
pub fn parse_list_versions<S: AsRef<str>>(lines: &[S]) -> HashMap<String, Vec<String>> {
    lines
        .iter()
        .filter_map(|line| {
            let mut words = line.as_ref().split_whitespace();
            let name = words.next()?;
            Some((name.to_string(), words.map(str::to_string).collect()))
        })
        .collect()
}

/// Installed version from `brew info --json=v2`, for formulae or casks.
pub fn parse_info_version(json: &str) -> Option<String> {
    let info: Value = serde_json::from_str(json).ok()?;
    let formula = info
        .pointer("/formulae/0/installed/0/version")
        .and_then(Value::as_str);
    let cask = info.pointer("/casks/0/installed").and_then(Value::as_str);
    formula.or(cask).map(str::to_string)
}

fn listed(cx: &mut Ctx<'_>, installed: &Installed) -> Result<HashMap<String, Vec<String>>> {
    if let Some(map) = installed.borrow().as_ref() {
        return Ok(map.clone());
    }
    let result = cx.sh("brew list --versions")?;
    let map = if result.success() {
        parse_list_versions(&result.logs)
    } else {
        HashMap::new()
    };
    *installed.borrow_mut() = Some(map.clone());
    Ok(map)
}

fn install(cx: &mut Ctx<'_>, spec: &Spec, installed: &Installed) -> Result<InstallStatus> {
    let (name, version) = spec.package();
    let listed = listed(cx, installed)?;

    // `python@3.12` is itself a formula name; try it whole first.
    let present = if let Some(versions) = listed.get(&spec.body) {
        !versions.is_empty() || version.is_none()
    } else if let Some(versions) = listed.get(name) {
        version.is_none_or(|v| versions.iter().any(|have| have.starts_with(v)))
    } else {
        let info = cx.sh(&format!("brew info --json=v2 {} 2>/dev/null", spec.body))?;
        info.success() && parse_info_version(&info.output()).is_some()
    };

    if present {
        cx.progress("installed", true);
        return Ok(InstallStatus::Unchanged);
    }

    let result = cx.sh(&format!("brew install {}", spec.body))?;
    *installed.borrow_mut() = None;
    Ok(if result.success() {
        InstallStatus::Installed
    } else {
        InstallStatus::Failed
    })
}
