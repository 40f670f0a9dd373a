//! Bare-import resolver.
//!
//! Reimplements manifest-driven package resolution for the `/@modules/` route:
//! package root discovery, conditional `exports`, `module`/`main` fallbacks
//! and direct subpath probing.

mod bare;
mod cache;
mod exports;
mod package;

use std::path::PathBuf;
use thiserror::Error;

pub use bare::{find_package_root, is_relative_specifier, resolve_bare, BareSpecifier, Resolver};
pub use cache::{
    CachedResolution, ManifestStamp, MemoryResolveCache, NoResolveCache, ResolveCache, ResolveKey,
};
pub use exports::{export_key, lookup_export, ExportLookup, CONDITION_PRIORITY};
pub use package::{read_descriptor, PackageDescriptor, MANIFEST_FILE, PACKAGES_DIR};

/// Why a bare specifier could not be resolved.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("package manifest not found at {path}")]
    ManifestMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read package manifest at {path}: {source}")]
    ManifestUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("package manifest at {path} is not valid JSON: {source}")]
    ManifestInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot find package `{package}`")]
    PackageNotFound { package: String },

    #[error("subpath `{}` is not exported by package `{package}`", display_subpath(.subpath))]
    SubpathNotExported { package: String, subpath: String },

    #[error("cannot resolve subpath `{}` in package `{package}`", display_subpath(.subpath))]
    SubpathUnresolvable { package: String, subpath: String },
}

fn display_subpath(subpath: &str) -> String {
    export_key(subpath)
}
