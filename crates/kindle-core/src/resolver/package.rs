//! Package manifest reading.
//!
//! Loads `package.json` from a package root and keeps only the fields the
//! bare-import resolver needs: `name`, `main`, `module` and `exports`.

use super::ResolveError;
use serde_json::{Map, Value};
use std::path::Path;

/// Manifest file name inside every package root.
pub const MANIFEST_FILE: &str = "package.json";

/// Directory that holds installed packages.
pub const PACKAGES_DIR: &str = "node_modules";

/// Parsed manifest fields. Immutable once read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageDescriptor {
    pub name: Option<String>,
    pub main: Option<String>,
    pub module: Option<String>,
    /// Export map normalized to `{ "<key>": <target or conditions> }`.
    pub exports: Option<Map<String, Value>>,
}

impl PackageDescriptor {
    /// Build a descriptor from an already-parsed manifest value.
    ///
    /// Non-string `name`/`main`/`module` values are ignored rather than
    /// rejected; only malformed JSON makes a manifest invalid.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let string_field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            name: string_field("name"),
            main: string_field("main"),
            module: string_field("module"),
            exports: value.get("exports").and_then(normalize_exports),
        }
    }
}

/// Read the descriptor at `package_root/package.json`.
pub fn read_descriptor(package_root: &Path) -> Result<PackageDescriptor, ResolveError> {
    let path = package_root.join(MANIFEST_FILE);
    let source = std::fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ResolveError::ManifestMissing {
                path: path.clone(),
                source,
            }
        } else {
            ResolveError::ManifestUnreadable {
                path: path.clone(),
                source,
            }
        }
    })?;
    let value: Value = serde_json::from_str(&source)
        .map_err(|source| ResolveError::ManifestInvalid { path, source })?;
    Ok(PackageDescriptor::from_value(&value))
}

/// Fold the shorthand `exports` shapes into the key-mapping form.
///
/// - `"./index.js"` becomes `{ ".": "./index.js" }`
/// - `{ "import": .., "default": .. }` becomes `{ ".": { .. } }`
/// - `{ ".": .., "./sub": .. }` is kept as is
fn normalize_exports(exports: &Value) -> Option<Map<String, Value>> {
    match exports {
        Value::String(_) => {
            let mut map = Map::new();
            map.insert(".".to_string(), exports.clone());
            Some(map)
        }
        Value::Object(obj) => {
            if obj.keys().any(|k| k.starts_with('.')) {
                Some(obj.clone())
            } else {
                let mut map = Map::new();
                map.insert(".".to_string(), exports.clone());
                Some(map)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_read_descriptor_fields() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name":"pkg","main":"./lib/index.js","module":"./esm/index.js","version":"1.0.0"}"#,
        )
        .unwrap();

        let desc = read_descriptor(dir.path()).unwrap();
        assert_eq!(desc.name.as_deref(), Some("pkg"));
        assert_eq!(desc.main.as_deref(), Some("./lib/index.js"));
        assert_eq!(desc.module.as_deref(), Some("./esm/index.js"));
        assert!(desc.exports.is_none());
    }

    #[test]
    fn test_read_descriptor_missing() {
        let dir = tempdir().unwrap();
        let err = read_descriptor(dir.path()).unwrap_err();
        assert!(matches!(err, ResolveError::ManifestMissing { .. }));
    }

    #[test]
    fn test_read_descriptor_unreadable_is_not_missing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), [0xff, 0xfe, b'{', b'}']).unwrap();
        let err = read_descriptor(dir.path()).unwrap_err();
        assert!(matches!(err, ResolveError::ManifestUnreadable { .. }));
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_read_descriptor_invalid() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();
        let err = read_descriptor(dir.path()).unwrap_err();
        assert!(matches!(err, ResolveError::ManifestInvalid { .. }));
    }

    #[test]
    fn test_exports_string_shorthand() {
        let desc = PackageDescriptor::from_value(&json!({ "exports": "./index.mjs" }));
        let exports = desc.exports.unwrap();
        assert_eq!(exports.get("."), Some(&json!("./index.mjs")));
    }

    #[test]
    fn test_exports_root_conditions() {
        let desc = PackageDescriptor::from_value(&json!({
            "exports": { "import": "./esm.js", "default": "./cjs.js" }
        }));
        let exports = desc.exports.unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports["."]["import"], json!("./esm.js"));
    }

    #[test]
    fn test_non_string_fields_ignored() {
        let desc = PackageDescriptor::from_value(&json!({ "main": 42, "module": null }));
        assert!(desc.main.is_none());
        assert!(desc.module.is_none());
    }
}
