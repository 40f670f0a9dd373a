//! Bare-import resolution.
//!
//! ```text
//! "@scope/pkg/sub/path"
//!   → split into ("@scope/pkg", "sub/path")
//!   → walk up from the project root looking for node_modules/@scope/pkg
//!   → read package.json
//!   → exports map (authoritative) | module | main | direct file probe
//! ```

use super::cache::{NoResolveCache, ResolveCache, ResolveKey};
use super::exports::{lookup_export, ExportLookup};
use super::package::{read_descriptor, MANIFEST_FILE, PACKAGES_DIR};
use super::ResolveError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Extensions probed, in order, after the bare candidate.
const PROBE_EXTENSIONS: &[&str] = &[".js", ".mjs"];

/// Entry used when a package has no usable entry field and no subpath.
const DEFAULT_ENTRY: &str = "index.js";

/// A bare specifier split into package name and subpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BareSpecifier {
    pub package_name: String,
    /// Subpath without a leading `./`; empty for the package root.
    pub subpath: String,
}

impl BareSpecifier {
    /// Split a specifier. A leading `@scope/name` counts as one package name.
    #[must_use]
    pub fn parse(specifier: &str) -> Self {
        let parts: Vec<&str> = specifier.split('/').collect();
        let name_len = if specifier.starts_with('@') { 2 } else { 1 };
        let name_len = name_len.min(parts.len());

        Self {
            package_name: parts[..name_len].join("/"),
            subpath: parts[name_len..].join("/"),
        }
    }
}

/// Whether a specifier is relative or absolute rather than bare.
#[must_use]
pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier.starts_with('.') || specifier.starts_with('/')
}

/// Find `<dir>/node_modules/<name>` starting at `project_root` and moving up.
///
/// The file-system root itself is not searched.
#[must_use]
pub fn find_package_root(package_name: &str, project_root: &Path) -> Option<PathBuf> {
    let mut dir = Some(project_root);

    while let Some(current) = dir {
        let parent = current.parent();
        if parent.is_none() {
            break;
        }

        let candidate = current.join(PACKAGES_DIR).join(package_name);
        trace!(candidate = %candidate.display(), "probing package root");
        if candidate.is_dir() {
            return Some(candidate);
        }
        dir = parent;
    }

    None
}

/// Resolve a bare specifier against a project root, without caching.
pub fn resolve_bare(specifier: &str, project_root: &Path) -> Result<PathBuf, ResolveError> {
    resolve_uncached(specifier, project_root).map(|(path, _)| path)
}

/// Returns the resolved file and the manifest consulted.
fn resolve_uncached(
    specifier: &str,
    project_root: &Path,
) -> Result<(PathBuf, PathBuf), ResolveError> {
    let bare = BareSpecifier::parse(specifier);
    if bare.package_name.is_empty() || is_relative_specifier(specifier) {
        return Err(ResolveError::PackageNotFound {
            package: specifier.to_string(),
        });
    }

    let package_root = find_package_root(&bare.package_name, project_root).ok_or_else(|| {
        ResolveError::PackageNotFound {
            package: bare.package_name.clone(),
        }
    })?;
    let manifest = package_root.join(MANIFEST_FILE);
    let descriptor = read_descriptor(&package_root)?;
    let subpath = bare.subpath.as_str();

    if let Some(exports) = &descriptor.exports {
        return match lookup_export(exports, subpath) {
            ExportLookup::Target(target) => Ok((join_target(&package_root, &target), manifest)),
            ExportLookup::KeyMissing | ExportLookup::NoMatchingCondition => {
                Err(ResolveError::SubpathNotExported {
                    package: bare.package_name,
                    subpath: bare.subpath,
                })
            }
        };
    }

    if subpath.is_empty() {
        if let Some(module) = &descriptor.module {
            return Ok((join_target(&package_root, module), manifest));
        }
        if let Some(main) = &descriptor.main {
            return Ok((join_target(&package_root, main), manifest));
        }
    }

    let candidate = if subpath.is_empty() {
        DEFAULT_ENTRY
    } else {
        subpath
    };
    let base = package_root.join(candidate);
    if base.is_file() {
        return Ok((base, manifest));
    }
    for ext in PROBE_EXTENSIONS {
        let with_ext = PathBuf::from(format!("{}{ext}", base.display()));
        if with_ext.is_file() {
            return Ok((with_ext, manifest));
        }
    }

    Err(ResolveError::SubpathUnresolvable {
        package: bare.package_name,
        subpath: bare.subpath,
    })
}

/// Join a manifest-relative target (`./dist/x.js` or `dist/x.js`) to the root.
fn join_target(package_root: &Path, target: &str) -> PathBuf {
    package_root.join(target.strip_prefix("./").unwrap_or(target))
}

/// Bare-import resolver with a pluggable cache.
#[derive(Debug, Clone)]
pub struct Resolver {
    cache: Arc<dyn ResolveCache>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Arc::new(NoResolveCache))
    }
}

impl Resolver {
    #[must_use]
    pub fn new(cache: Arc<dyn ResolveCache>) -> Self {
        Self { cache }
    }

    /// Resolve `specifier` to an absolute file path.
    pub fn resolve(&self, specifier: &str, project_root: &Path) -> Result<PathBuf, ResolveError> {
        let key = ResolveKey::new(specifier, project_root);
        if let Some(hit) = self.cache.get(&key) {
            debug!(specifier, resolved = %hit.display(), "resolve cache hit");
            return Ok(hit);
        }

        let (resolved, manifest) = resolve_uncached(specifier, project_root)?;
        debug!(specifier, resolved = %resolved.display(), "resolved bare import");
        self.cache.set(key, resolved.clone(), &manifest);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MemoryResolveCache;
    use std::fs;
    use tempfile::tempdir;

    fn write_package(root: &Path, name: &str, manifest: &str, files: &[&str]) -> PathBuf {
        let pkg = root.join(PACKAGES_DIR).join(name);
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join(MANIFEST_FILE), manifest).unwrap();
        for file in files {
            let path = pkg.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "export {};").unwrap();
        }
        pkg
    }

    #[test]
    fn test_parse_plain() {
        let bare = BareSpecifier::parse("react");
        assert_eq!(bare.package_name, "react");
        assert_eq!(bare.subpath, "");

        let bare = BareSpecifier::parse("react/jsx-runtime");
        assert_eq!(bare.package_name, "react");
        assert_eq!(bare.subpath, "jsx-runtime");
    }

    #[test]
    fn test_parse_scoped() {
        let bare = BareSpecifier::parse("@scope/pkg/sub/path");
        assert_eq!(bare.package_name, "@scope/pkg");
        assert_eq!(bare.subpath, "sub/path");

        let bare = BareSpecifier::parse("@scope/pkg");
        assert_eq!(bare.package_name, "@scope/pkg");
        assert_eq!(bare.subpath, "");
    }

    #[test]
    fn test_exports_subpath_import_condition() {
        let dir = tempdir().unwrap();
        let pkg = write_package(
            dir.path(),
            "pkg",
            r#"{"exports":{"./foo":{"import":"./foo.mjs"}}}"#,
            &["foo.mjs"],
        );

        let resolved = resolve_bare("pkg/foo", dir.path()).unwrap();
        assert_eq!(resolved, pkg.join("foo.mjs"));
    }

    #[test]
    fn test_exports_missing_key_is_authoritative() {
        let dir = tempdir().unwrap();
        write_package(
            dir.path(),
            "pkg",
            r#"{"exports":{"./foo":{"import":"./foo.mjs"}},"main":"bar.js"}"#,
            &["foo.mjs", "bar.js", "bar"],
        );

        let err = resolve_bare("pkg/bar", dir.path()).unwrap_err();
        assert!(matches!(err, ResolveError::SubpathNotExported { .. }));
    }

    #[test]
    fn test_module_preferred_over_main() {
        let dir = tempdir().unwrap();
        let pkg = write_package(
            dir.path(),
            "pkg",
            r#"{"main":"./cjs/index.js","module":"./esm/index.js"}"#,
            &["cjs/index.js", "esm/index.js"],
        );
        assert_eq!(
            resolve_bare("pkg", dir.path()).unwrap(),
            pkg.join("esm/index.js")
        );
    }

    #[test]
    fn test_main_used_without_module() {
        let dir = tempdir().unwrap();
        let pkg = write_package(dir.path(), "pkg", r#"{"main":"lib/main.js"}"#, &["lib/main.js"]);
        assert_eq!(resolve_bare("pkg", dir.path()).unwrap(), pkg.join("lib/main.js"));
    }

    #[test]
    fn test_subpath_probing_order() {
        let dir = tempdir().unwrap();
        let pkg = write_package(
            dir.path(),
            "pkg",
            r#"{"main":"index.js"}"#,
            &["utils.mjs", "helpers.js", "helpers.mjs"],
        );

        assert_eq!(resolve_bare("pkg/helpers", dir.path()).unwrap(), pkg.join("helpers.js"));
        assert_eq!(resolve_bare("pkg/utils", dir.path()).unwrap(), pkg.join("utils.mjs"));
    }

    #[test]
    fn test_index_fallback() {
        let dir = tempdir().unwrap();
        let pkg = write_package(dir.path(), "pkg", r#"{"name":"pkg"}"#, &["index.js"]);
        assert_eq!(resolve_bare("pkg", dir.path()).unwrap(), pkg.join("index.js"));
    }

    #[test]
    fn test_subpath_unresolvable() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), "pkg", r#"{"name":"pkg"}"#, &[]);
        let err = resolve_bare("pkg/missing", dir.path()).unwrap_err();
        assert!(matches!(err, ResolveError::SubpathUnresolvable { .. }));
    }

    #[test]
    fn test_package_not_found() {
        let dir = tempdir().unwrap();
        let err = resolve_bare("left-pad", dir.path()).unwrap_err();
        match err {
            ResolveError::PackageNotFound { package } => assert_eq!(package, "left-pad"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_upward_search() {
        let dir = tempdir().unwrap();
        let pkg = write_package(dir.path(), "shared", r#"{"main":"index.js"}"#, &["index.js"]);
        let nested = dir.path().join("apps").join("web");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(resolve_bare("shared", &nested).unwrap(), pkg.join("index.js"));
    }

    #[test]
    fn test_manifest_missing() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(PACKAGES_DIR).join("bare")).unwrap();
        let err = resolve_bare("bare", dir.path()).unwrap_err();
        assert!(matches!(err, ResolveError::ManifestMissing { .. }));
    }

    #[test]
    fn test_resolver_with_memory_cache() {
        let dir = tempdir().unwrap();
        let pkg = write_package(dir.path(), "pkg", r#"{"main":"a.js"}"#, &["a.js", "b.js"]);
        let cache = Arc::new(MemoryResolveCache::new());
        let resolver = Resolver::new(cache.clone());

        assert_eq!(resolver.resolve("pkg", dir.path()).unwrap(), pkg.join("a.js"));
        assert_eq!(cache.len(), 1);

        // Editing the manifest invalidates the cached entry.
        fs::write(pkg.join(MANIFEST_FILE), r#"{"main":"b.js","name":"pkg"}"#).unwrap();
        assert_eq!(resolver.resolve("pkg", dir.path()).unwrap(), pkg.join("b.js"));
    }

    #[test]
    fn test_resolver_without_cache_rereads() {
        let dir = tempdir().unwrap();
        let pkg = write_package(dir.path(), "pkg", r#"{"main":"a.js"}"#, &["a.js", "b.js"]);
        let resolver = Resolver::default();

        assert_eq!(resolver.resolve("pkg", dir.path()).unwrap(), pkg.join("a.js"));
        fs::write(pkg.join(MANIFEST_FILE), r#"{"main":"b.js"}"#).unwrap();
        assert_eq!(resolver.resolve("pkg", dir.path()).unwrap(), pkg.join("b.js"));
    }
}
