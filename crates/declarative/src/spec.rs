//! Target spec parsing.
//!
//! Grammar: `[resolver::]body[?k=v&k2=v2]`. Parsing is total: every string
//! yields a spec, and whether any resolver claims it is decided later.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Structured form of a raw target string.
///
/// Identity is the fqn (`resolver::body`); query params are extra input and
/// do not take part in equality.
#[derive(Debug, Clone)]
pub struct Spec {
    pub raw: String,
    pub resolver: String,
    pub body: String,
    pub params: BTreeMap<String, String>,
    /// Whether the raw string named its resolver explicitly
    pub explicit: bool,
}

impl Spec {
    pub fn parse(raw: &str, default_resolver: &str) -> Self {
        let raw = raw.trim();
        let (head, query) = match raw.rsplit_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (raw, None),
        };

        let (resolver, body, explicit) = match head.split_once("::") {
            Some((resolver, body)) if !resolver.is_empty() => (resolver, body, true),
            Some((_, body)) => (default_resolver, body, false),
            None => (default_resolver, head, false),
        };

        let params = query
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            raw: raw.to_string(),
            resolver: resolver.to_string(),
            body: body.to_string(),
            params,
            explicit,
        }
    }

    pub fn fqn(&self) -> String {
        format!("{}::{}", self.resolver, self.body)
    }

    /// Same spec with a canonical body.
    pub fn with_body(&self, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..self.clone()
        }
    }

    /// Split `pkg[@version]`.
    pub fn package(&self) -> (&str, Option<&str>) {
        match self.body.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (&self.body, None),
        }
    }
}

impl PartialEq for Spec {
    fn eq(&self, other: &Self) -> bool {
        self.resolver == other.resolver && self.body == other.body
    }
}

impl Eq for Spec {}

impl Hash for Spec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fqn().hash(state);
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.resolver, self.body)
    }
}

/// Whether `raw` is relative to the declaring unit (`./x`, `../x`).
pub fn is_relative(raw: &str) -> bool {
    raw == "." || raw == ".." || raw.starts_with("./") || raw.starts_with("../")
}

/// Rewrite a relative spec against `base`, the declaring unit's directory
/// under the configs root. `..` never climbs above the root.
///
/// `./zsh:plugins` declared in `shell` becomes `//shell/zsh:plugins`.
pub fn rewrite_relative(raw: &str, base: &str) -> String {
    if !is_relative(raw) {
        return raw.to_string();
    }

    let split = raw.find([':', '?']).unwrap_or(raw.len());
    let (path, rest) = raw.split_at(split);

    let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    format!("//{}{rest}", parts.join("/"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_parse_ignores_surrounding_whitespace() {
        let spec = Spec::parse("  brew::jq \n", "conf");
        assert_eq!(spec.resolver, "brew");
        assert_eq!(spec.body, "jq");
        assert_eq!(spec.fqn(), "brew::jq");
    }

    #[test]
    fn test_parse_with_resolver_and_query() {
        let spec = Spec::parse("r::b?k=v", "conf");
        assert_eq!(spec.fqn(), "r::b");
        assert_eq!(spec.params, BTreeMap::from([("k".to_string(), "v".to_string())]));
        assert!(spec.explicit);
    }

    #[test]
    fn test_parse_defaults_resolver() {
        let spec = Spec::parse("//tools/zsh:main", "conf");
        assert_eq!(spec.resolver, "conf");
        assert_eq!(spec.body, "//tools/zsh:main");
        assert!(!spec.explicit);
    }

    #[test]
    fn test_parse_root_spec() {
        let spec = Spec::parse("conf:::main", "conf");
        assert_eq!(spec.resolver, "conf");
        assert_eq!(spec.body, ":main");
    }

    #[test]
    fn test_parse_keeps_bare_query_tokens() {
        let spec = Spec::parse("brew::git?force&tag=a%20b", "conf");
        assert_eq!(spec.params.get("force").map(String::as_str), Some(""));
        assert_eq!(spec.params.get("tag").map(String::as_str), Some("a b"));
    }

    #[test]
    fn test_parse_unclaimed_resolver_is_legal() {
        let spec = Spec::parse("nobody::x", "conf");
        assert_eq!(spec.resolver, "nobody");
    }

    #[test]
    fn test_identity_ignores_params() {
        assert_eq!(Spec::parse("r::b?x=1", "d"), Spec::parse("r::b?x=2", "d"));
        assert_ne!(Spec::parse("r::b", "d"), Spec::parse("s::b", "d"));
    }

    #[test]
    fn test_package_split() {
        let spec = Spec::parse("pipx::black@24.1", "conf");
        assert_eq!(spec.package(), ("black", Some("24.1")));
        assert_eq!(Spec::parse("brew::git", "conf").package(), ("git", None));
    }

    #[test]
    fn test_rewrite_relative() {
        assert_eq!(rewrite_relative("./zsh", "shell"), "//shell/zsh");
        assert_eq!(rewrite_relative("./zsh:plugins?x=1", "shell"), "//shell/zsh:plugins?x=1");
        assert_eq!(rewrite_relative("../git", "shell/zsh"), "//shell/git");
        assert_eq!(rewrite_relative("./:b", ""), "//:b");
        assert_eq!(rewrite_relative("../../../x", "a"), "//x");
        assert_eq!(rewrite_relative("brew::git", "shell"), "brew::git");
    }

    proptest! {
        #[test]
        fn test_parse_is_total(raw in ".*") {
            let spec = Spec::parse(&raw, "conf");
            prop_assert!(!spec.resolver.is_empty());
            prop_assert_eq!(spec.raw, raw);
        }

        #[test]
        fn test_fqn_reparses_to_same_identity(
            resolver in "[a-z]{1,8}",
            body in "[a-z/:._-]{0,16}",
        ) {
            let spec = Spec::parse(&format!("{resolver}::{body}"), "conf");
            let again = Spec::parse(&spec.fqn(), "conf");
            prop_assert_eq!(spec, again);
        }
    }
}
