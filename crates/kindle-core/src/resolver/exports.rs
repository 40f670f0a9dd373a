//! Conditional `exports` evaluation.
//!
//! Only exact keys are matched (`"."` and `"./sub/path"`); a present map is
//! authoritative, so a missing key never falls back to `main`/`module`.

use serde_json::{Map, Value};

/// Conditions tried in order for every export entry.
pub const CONDITION_PRIORITY: &[&str] = &["import", "module", "browser", "default"];

/// Outcome of looking a subpath up in an export map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportLookup {
    /// The entry resolved to this target (as written, usually `./...`).
    Target(String),
    /// The map has no entry for the export key.
    KeyMissing,
    /// The key exists but no condition yields a string target.
    NoMatchingCondition,
}

/// Export key for a subpath: `"."` for the package root, `"./sub"` otherwise.
#[must_use]
pub fn export_key(subpath: &str) -> String {
    if subpath.is_empty() {
        ".".to_string()
    } else {
        format!("./{subpath}")
    }
}

/// Look up `subpath` in a normalized export map.
#[must_use]
pub fn lookup_export(exports: &Map<String, Value>, subpath: &str) -> ExportLookup {
    let Some(entry) = exports.get(&export_key(subpath)) else {
        return ExportLookup::KeyMissing;
    };

    match resolve_target(entry) {
        Some(target) => ExportLookup::Target(target),
        None => ExportLookup::NoMatchingCondition,
    }
}

/// Resolve a target value: a string wins directly, an object is searched by
/// [`CONDITION_PRIORITY`] with nested objects evaluated the same way.
fn resolve_target(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(conditions) => CONDITION_PRIORITY
            .iter()
            .filter_map(|c| conditions.get(*c))
            .find_map(resolve_target),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_export_key() {
        assert_eq!(export_key(""), ".");
        assert_eq!(export_key("foo"), "./foo");
        assert_eq!(export_key("sub/path"), "./sub/path");
    }

    #[test]
    fn test_direct_string_target() {
        let exports = map(json!({ ".": "./index.js" }));
        assert_eq!(
            lookup_export(&exports, ""),
            ExportLookup::Target("./index.js".to_string())
        );
    }

    #[test]
    fn test_condition_priority() {
        let exports = map(json!({
            ".": { "default": "./d.js", "browser": "./b.js", "module": "./m.js" }
        }));
        assert_eq!(
            lookup_export(&exports, ""),
            ExportLookup::Target("./m.js".to_string())
        );
    }

    #[test]
    fn test_require_only_has_no_match() {
        let exports = map(json!({ "./foo": { "require": "./foo.cjs" } }));
        assert_eq!(lookup_export(&exports, "foo"), ExportLookup::NoMatchingCondition);
    }

    #[test]
    fn test_nested_conditions() {
        let exports = map(json!({
            ".": { "browser": { "require": "./x.cjs", "default": "./browser.js" } }
        }));
        assert_eq!(
            lookup_export(&exports, ""),
            ExportLookup::Target("./browser.js".to_string())
        );
    }

    #[test]
    fn test_nested_without_string_falls_through() {
        let exports = map(json!({
            ".": { "import": { "types": "./x.d.ts" }, "default": "./index.js" }
        }));
        assert_eq!(
            lookup_export(&exports, ""),
            ExportLookup::Target("./index.js".to_string())
        );
    }

    #[test]
    fn test_missing_key() {
        let exports = map(json!({ ".": "./index.js" }));
        assert_eq!(lookup_export(&exports, "other"), ExportLookup::KeyMissing);
    }

    #[test]
    fn test_null_entry_blocks() {
        let exports = map(json!({ "./internal": null }));
        assert_eq!(
            lookup_export(&exports, "internal"),
            ExportLookup::NoMatchingCondition
        );
    }
}
