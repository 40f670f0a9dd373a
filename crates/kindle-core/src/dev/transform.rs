//! Per-request module serving.
//!
//! Source files: read → CommonJS rewrite → plugin transform → bare import
//! rewrite → lower. Dependencies: resolve → read → env substitution →
//! bundle → relative import rebase → bare import rewrite. Files a dependency
//! reaches through relative imports come back through the source route and
//! skip the CommonJS rewrite and plugins.

use crate::dev::cjs::rewrite_cjs;
use crate::dev::env::substitute_dependency_env;
use crate::dev::hmr::project_relative_path;
use crate::dev::rewrite::{rewrite_bare_imports, rewrite_specifiers};
use crate::plugin::{Hook, PluginPipeline};
use crate::resolver::{ResolveError, Resolver, PACKAGES_DIR};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Content type of every module response.
pub const JS_CONTENT_TYPE: &str = "application/javascript";

/// Body served for a stylesheet that does not exist.
pub const EMPTY_STYLE_MODULE: &str = "export default {};";

/// Extensions handled by the source route.
pub const SOURCE_EXTENSIONS: &[&str] = &["js", "mjs", "jsx", "ts", "tsx", "css"];

/// Suffixes tried, in order, for a dependency's relative import.
const RELATIVE_PROBES: &[&str] = &["", ".js", ".mjs", "/index.js"];

/// Source syntax passed to the lowering step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Js,
    Jsx,
}

impl Loader {
    /// `jsx` for extensions containing an `x` (`.jsx`, `.tsx`), `js` otherwise.
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext.contains('x') {
            Self::Jsx
        } else {
            Self::Js
        }
    }
}

/// Error from the lowering/bundling toolchain.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ToolchainError {
    pub message: String,
}

impl ToolchainError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Syntax lowering and dependency bundling.
pub trait Toolchain: Send + Sync + fmt::Debug {
    /// Lower non-standard syntax (JSX, type annotations) to plain ES modules.
    fn lower(&self, code: &str, id: &str, loader: Loader) -> Result<String, ToolchainError>;

    /// Bundle a dependency entry into one ES module.
    fn bundle(&self, code: &str, entry: &Path) -> Result<String, ToolchainError>;
}

/// Returns code unchanged. Dependencies stay one module per file: their bare
/// imports go back through `/@modules/` and their relative imports are
/// rebased onto `/node_modules/...` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughToolchain;

impl Toolchain for PassthroughToolchain {
    fn lower(&self, code: &str, _id: &str, _loader: Loader) -> Result<String, ToolchainError> {
        Ok(code.to_string())
    }

    fn bundle(&self, code: &str, _entry: &Path) -> Result<String, ToolchainError> {
        Ok(code.to_string())
    }
}

/// Why a module could not be served.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("cannot resolve `{specifier}`: {source}")]
    Resolve {
        specifier: String,
        #[source]
        source: ResolveError,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("toolchain failed on {id}: {source}")]
    Toolchain {
        id: String,
        #[source]
        source: ToolchainError,
    },
}

impl ServeError {
    /// Whether this maps to a missing resource rather than a server fault.
    /// Resolution and read failures count as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        !matches!(self, Self::Toolchain { .. })
    }
}

/// A module ready to send.
#[derive(Debug, Clone)]
pub struct ServedModule {
    pub code: String,
    pub content_type: &'static str,
    /// File the module was read from; `None` for synthesized modules.
    pub file_path: Option<PathBuf>,
}

impl ServedModule {
    fn js(code: String, file_path: Option<PathBuf>) -> Self {
        Self {
            code,
            content_type: JS_CONTENT_TYPE,
            file_path,
        }
    }
}

/// Serves project sources and dependencies as browser-ready modules.
///
/// Holds only read-only state; each call is independent.
#[derive(Debug, Clone)]
pub struct ModuleServer {
    root: PathBuf,
    resolver: Resolver,
    plugins: PluginPipeline,
    toolchain: Arc<dyn Toolchain>,
}

impl ModuleServer {
    #[must_use]
    pub fn new(
        root: PathBuf,
        resolver: Resolver,
        plugins: PluginPipeline,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        Self {
            root,
            resolver,
            plugins,
            toolchain,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn plugins(&self) -> &PluginPipeline {
        &self.plugins
    }

    /// Map a root-relative URL path to a file under the project root.
    ///
    /// Parent-directory components are rejected.
    #[must_use]
    pub fn file_for_url(&self, url_path: &str) -> Option<PathBuf> {
        let rel = Path::new(url_path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(rel))
    }

    /// Serve a project file such as `/src/App.jsx`.
    pub async fn serve_source(&self, url_path: &str) -> Result<ServedModule, ServeError> {
        let not_found = || ServeError::FileNotFound {
            path: url_path.to_string(),
        };
        let file = self.file_for_url(url_path).ok_or_else(not_found)?;
        let is_style = file.extension().is_some_and(|e| e == "css");

        if !file.is_file() {
            if is_style {
                warn!(path = url_path, "stylesheet not found, serving empty module");
                return Ok(ServedModule::js(EMPTY_STYLE_MODULE.to_string(), None));
            }
            debug!(path = url_path, "source file not found");
            return Err(not_found());
        }

        let source = tokio::fs::read_to_string(&file)
            .await
            .map_err(|source| ServeError::Io {
                path: file.clone(),
                source,
            })?;
        let id = file.display().to_string();

        let code = if is_dependency_path(&file) {
            rebase_relative_imports(&substitute_dependency_env(&source), &file, &self.root)
        } else {
            let converted = rewrite_cjs(&source, &file);
            match self.plugins.apply(Hook::Transform, &converted, &id).await {
                Ok(code) => code,
                Err(err) => {
                    error!(module_id = %id, error = %err, "plugin pipeline failed, serving untransformed code");
                    converted
                }
            }
        };

        let rewritten = rewrite_bare_imports(&code);
        let lowered = match self.toolchain.lower(&rewritten, &id, Loader::for_path(&file)) {
            Ok(code) => code,
            Err(err) => {
                warn!(module_id = %id, error = %err, "lowering failed, serving unlowered code");
                rewritten
            }
        };

        Ok(ServedModule::js(lowered, Some(file)))
    }

    /// Serve a bare specifier such as `react` or `@scope/pkg/sub`.
    pub async fn serve_dependency(&self, specifier: &str) -> Result<ServedModule, ServeError> {
        let file = self
            .resolver
            .resolve(specifier, &self.root)
            .map_err(|source| {
                warn!(specifier, error = %source, "module resolution failed");
                ServeError::Resolve {
                    specifier: specifier.to_string(),
                    source,
                }
            })?;

        let source = tokio::fs::read_to_string(&file)
            .await
            .map_err(|source| ServeError::Io {
                path: file.clone(),
                source,
            })?;

        let code = substitute_dependency_env(&source);
        let bundled = self
            .toolchain
            .bundle(&code, &file)
            .map_err(|source| ServeError::Toolchain {
                id: file.display().to_string(),
                source,
            })?;

        let code = rebase_relative_imports(&bundled, &file, &self.root);
        Ok(ServedModule::js(rewrite_bare_imports(&code), Some(file)))
    }
}

/// Rewrite a dependency's `./` and `../` specifiers into root-relative URLs
/// for the file they name, so the browser fetches them from the source
/// route. Specifiers that name no file under `root` are left alone.
#[must_use]
pub fn rebase_relative_imports(code: &str, file: &Path, root: &Path) -> String {
    let Some(dir) = file.parent() else {
        return code.to_string();
    };

    rewrite_specifiers(code, |specifier| {
        if !(specifier.starts_with("./") || specifier.starts_with("../")) {
            return None;
        }
        let target = normalize_path(&dir.join(specifier));
        let found = RELATIVE_PROBES.iter().find_map(|suffix| {
            let mut candidate = target.clone().into_os_string();
            candidate.push(suffix);
            let candidate = PathBuf::from(candidate);
            candidate.is_file().then_some(candidate)
        })?;
        found
            .starts_with(root)
            .then(|| project_relative_path(&found, root))
    })
}

/// Fold `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Whether a file lives inside an installed package.
#[must_use]
pub fn is_dependency_path(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == PACKAGES_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{CssPlugin, HookResult, PluginError, TransformPlugin};
    use futures::future::{self, BoxFuture};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct Fail;

    impl TransformPlugin for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        fn transform<'a>(
            &'a self,
            _code: &'a str,
            _id: &'a str,
        ) -> BoxFuture<'a, HookResult<Option<String>>> {
            Box::pin(future::ready(Err(PluginError::new(
                "fail",
                Hook::Transform,
                "boom",
            ))))
        }
    }

    #[derive(Debug)]
    struct BrokenLowering;

    impl Toolchain for BrokenLowering {
        fn lower(&self, _code: &str, _id: &str, _loader: Loader) -> Result<String, ToolchainError> {
            Err(ToolchainError::new("unexpected token"))
        }

        fn bundle(&self, code: &str, _entry: &Path) -> Result<String, ToolchainError> {
            Ok(code.to_string())
        }
    }

    fn project() -> TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
        fs::write(
            dir.path().join("node_modules/dep/package.json"),
            r#"{"name":"dep","module":"index.js"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("node_modules/dep/index.js"),
            "import other from 'other';\nif (process.env.NODE_ENV === 'development') {}\nexport default process;\n",
        )
        .unwrap();
        dir
    }

    fn server(dir: &TempDir, plugins: PluginPipeline) -> ModuleServer {
        ModuleServer::new(
            dir.path().to_path_buf(),
            Resolver::default(),
            plugins,
            Arc::new(PassthroughToolchain),
        )
    }

    #[test]
    fn test_loader_for_path() {
        assert_eq!(Loader::for_path(Path::new("a.jsx")), Loader::Jsx);
        assert_eq!(Loader::for_path(Path::new("a.tsx")), Loader::Jsx);
        assert_eq!(Loader::for_path(Path::new("a.ts")), Loader::Js);
        assert_eq!(Loader::for_path(Path::new("a.js")), Loader::Js);
    }

    #[test]
    fn test_file_for_url_rejects_parent() {
        let dir = project();
        let server = server(&dir, PluginPipeline::default());
        assert!(server.file_for_url("/../secret.js").is_none());
        assert_eq!(
            server.file_for_url("/src/App.jsx"),
            Some(dir.path().join("src/App.jsx"))
        );
    }

    #[tokio::test]
    async fn test_serve_source_full_chain() {
        let dir = project();
        fs::write(
            dir.path().join("src/App.jsx"),
            "const React = require('react');\nexports.App = () => React;\n",
        )
        .unwrap();

        let served = server(&dir, PluginPipeline::default())
            .serve_source("/src/App.jsx")
            .await
            .unwrap();

        assert_eq!(
            served.code,
            "import React from '/@modules/react';\nexport const App = () => React;\n"
                .replace('\'', "\"")
        );
        assert_eq!(served.content_type, JS_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_missing_style_is_empty_module() {
        let dir = project();
        let served = server(&dir, PluginPipeline::default())
            .serve_source("/src/missing.css")
            .await
            .unwrap();
        assert_eq!(served.code, EMPTY_STYLE_MODULE);
        assert!(served.file_path.is_none());
    }

    #[tokio::test]
    async fn test_missing_code_is_not_found() {
        let dir = project();
        let err = server(&dir, PluginPipeline::default())
            .serve_source("/src/missing.js")
            .await
            .unwrap_err();
        assert!(matches!(err, ServeError::FileNotFound { ref path } if path == "/src/missing.js"));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_plugin_failure_serves_pre_pipeline_code() {
        let dir = project();
        fs::write(dir.path().join("src/main.js"), "import x from 'x';\n").unwrap();

        let plugins = PluginPipeline::new(vec![Arc::new(Fail)]);
        let served = server(&dir, plugins).serve_source("/src/main.js").await.unwrap();
        assert_eq!(served.code, "import x from '/@modules/x';\n");
    }

    #[tokio::test]
    async fn test_css_plugin_on_stylesheet() {
        let dir = project();
        fs::write(dir.path().join("src/index.css"), "body { margin: 0 }").unwrap();

        let plugins = PluginPipeline::new(vec![Arc::new(CssPlugin)]);
        let served = server(&dir, plugins).serve_source("/src/index.css").await.unwrap();
        assert!(served.code.contains("document.createElement('style')"));
        assert!(served.code.contains("body { margin: 0 }"));
    }

    #[tokio::test]
    async fn test_dependency_files_skip_cjs_and_plugins() {
        let dir = project();
        fs::write(
            dir.path().join("node_modules/dep/cjs.js"),
            "exports.a = 1;\n",
        )
        .unwrap();

        let plugins = PluginPipeline::new(vec![Arc::new(Fail)]);
        let served = server(&dir, plugins)
            .serve_source("/node_modules/dep/cjs.js")
            .await
            .unwrap();
        assert_eq!(served.code, "exports.a = 1;\n");
    }

    #[tokio::test]
    async fn test_lowering_failure_serves_unlowered_code() {
        let dir = project();
        fs::write(dir.path().join("src/App.jsx"), "export const App = () => <div />;\n").unwrap();

        let server = ModuleServer::new(
            dir.path().to_path_buf(),
            Resolver::default(),
            PluginPipeline::default(),
            Arc::new(BrokenLowering),
        );
        let served = server.serve_source("/src/App.jsx").await.unwrap();
        assert_eq!(served.code, "export const App = () => <div />;\n");
    }

    #[tokio::test]
    async fn test_serve_dependency() {
        let dir = project();
        let served = server(&dir, PluginPipeline::default())
            .serve_dependency("dep")
            .await
            .unwrap();

        assert_eq!(
            served.code,
            "import other from '/@modules/other';\nif (\"development\" === 'development') {}\nexport default {};\n"
        );
    }

    #[tokio::test]
    async fn test_dependency_relative_import_followed_through_source_route() {
        let dir = project();
        let pkg = dir.path().join("node_modules/multi");
        fs::create_dir_all(pkg.join("util")).unwrap();
        fs::write(pkg.join("package.json"), r#"{"name":"multi","main":"index.js"}"#).unwrap();
        fs::write(
            pkg.join("index.js"),
            "export * from './lib.js';\nexport { u } from './util';\nexport { gone } from './gone.js';\n",
        )
        .unwrap();
        fs::write(pkg.join("lib.js"), "export const mode = process.env.NODE_ENV;\n").unwrap();
        fs::write(pkg.join("util/index.js"), "export const u = 1;\n").unwrap();

        let server = server(&dir, PluginPipeline::default());
        let entry = server.serve_dependency("multi").await.unwrap();
        assert_eq!(
            entry.code,
            "export * from '/node_modules/multi/lib.js';\n\
             export { u } from '/node_modules/multi/util/index.js';\n\
             export { gone } from './gone.js';\n"
        );

        let lib = server.serve_source("/node_modules/multi/lib.js").await.unwrap();
        assert_eq!(lib.code, "export const mode = \"development\";\n");
    }

    #[test]
    fn test_rebase_ignores_bare_and_escaping_specifiers() {
        let dir = project();
        fs::write(dir.path().join("outside.js"), "").unwrap();
        let root = dir.path().join("node_modules");
        let file = root.join("dep/index.js");

        let code = "import other from 'other';\nimport o from '../../outside.js';\n";
        assert_eq!(rebase_relative_imports(code, &file, &root), code);
    }

    #[tokio::test]
    async fn test_serve_dependency_missing_package() {
        let dir = project();
        let err = server(&dir, PluginPipeline::default())
            .serve_dependency("left-pad")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("left-pad"));
    }
}
