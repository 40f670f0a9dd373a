//! Unbundled development serving.
//!
//! Serves individual ES modules on demand. Each source request runs
//! read → CommonJS rewrite → plugin transform → bare import rewrite → lower;
//! each `/@modules/` request resolves a bare specifier from the installed
//! packages.

pub mod cjs;
pub mod env;
pub mod hmr;
pub mod html;
pub mod rewrite;
pub mod transform;

pub use cjs::rewrite_cjs;
pub use env::{load_env_files, substitute_dependency_env, ClientEnv};
pub use hmr::{
    classify, live_update_client, ChangeKind, LiveUpdateHub, LiveUpdateMessage, WatchEvent,
    REFRESH_SHIM,
};
pub use html::{find_index_html, inject_bootstrap, LIVE_UPDATE_ROUTE, REFRESH_SHIM_ROUTE};
pub use rewrite::{rewrite_bare_imports, MODULES_PREFIX};
pub use transform::{
    Loader, ModuleServer, PassthroughToolchain, ServeError, ServedModule, Toolchain,
    ToolchainError, SOURCE_EXTENSIONS,
};
