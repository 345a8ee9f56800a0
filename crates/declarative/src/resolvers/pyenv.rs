//! Python interpreters and virtualenvs: `pyenv::python/3.12.1[/venv]`.

use super::tool::{ToolResolver, tool_resolver};
use crate::context::Ctx;
use crate::error::{BuildError, Result};
use crate::spec::Spec;
use crate::types::InstallStatus;

pub fn pyenv() -> ToolResolver {
    tool_resolver("pyenv", install)
}

/// `python/<version>[/<venv>]`
pub fn parse_body(body: &str) -> Option<(String, Option<String>)> {
    let rest = body.strip_prefix("python/")?;
    let mut parts = rest.splitn(2, '/');
    let version = parts.next().filter(|v| !v.is_empty())?;
    let venv = parts.next().filter(|v| !v.is_empty()).map(str::to_string);
    Some((version.to_string(), venv))
}

fn has_line(lines: &[String], wanted: &str) -> bool {
    lines.iter().any(|line| line.trim() == wanted)
}

fn install(cx: &mut Ctx<'_>, spec: &Spec) -> Result<InstallStatus> {
    let (version, venv) = parse_body(&spec.body).ok_or_else(|| {
        BuildError::target(format!(
            "`{}` is not of the form python/<version>[/<venv>]",
            spec.body
        ))
    })?;

    let listing = cx.sh("pyenv versions --bare")?;
    let known = if listing.success() { listing.logs } else { Vec::new() };
    let mut changed = false;

    if !has_line(&known, &version) {
        cx.progress("env_state", "installing interpreter");
        if !cx.sh(&format!("pyenv install -s {version}"))?.success() {
            return Ok(InstallStatus::Failed);
        }
        changed = true;
    }

    if let Some(venv) = venv {
        let nested = format!("{version}/envs/{venv}");
        if !has_line(&known, &venv) && !has_line(&known, &nested) {
            cx.progress("env_state", "creating virtualenv");
            if !cx.sh(&format!("pyenv virtualenv {version} {venv}"))?.success() {
                return Ok(InstallStatus::Failed);
            }
            changed = true;
        }
    }

    cx.progress("env_state", "ready");
    Ok(if changed {
        InstallStatus::Installed
    } else {
        InstallStatus::Unchanged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body("python/3.12.1"), Some(("3.12.1".into(), None)));
        assert_eq!(
            parse_body("python/3.12.1/tools"),
            Some(("3.12.1".into(), Some("tools".into())))
        );
        assert_eq!(parse_body("python/"), None);
        assert_eq!(parse_body("ruby/3.3"), None);
    }

    #[test]
    fn test_version_lines_match_exactly() {
        let lines = vec!["3.12.1".to_string(), "  3.12.1/envs/tools".to_string()];
        assert!(has_line(&lines, "3.12.1"));
        assert!(has_line(&lines, "3.12.1/envs/tools"));
        assert!(!has_line(&lines, "3.12"));
    }
}
