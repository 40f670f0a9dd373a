//! Resolution cache trait.
//!
//! The default is [`NoResolveCache`]: every request re-resolves and re-reads
//! the manifest. [`MemoryResolveCache`] keeps results keyed by
//! `(specifier, project root)` and stamps them with the manifest's
//! mtime/size so an edited manifest invalidates its entries.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File stamp for cache invalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestStamp {
    /// Modification time in milliseconds since epoch.
    pub mtime_ms: Option<u64>,
    /// File size in bytes.
    pub size: Option<u64>,
}

impl ManifestStamp {
    /// Create stamp from a path by reading its metadata.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        if let Ok(meta) = path.metadata() {
            let mtime_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64);
            Self {
                mtime_ms,
                size: Some(meta.len()),
            }
        } else {
            Self::default()
        }
    }

    /// Check if the stamp matches the current file state.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        *self == Self::from_path(path)
    }
}

/// Cache key: the literal specifier and the project root it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveKey {
    pub specifier: String,
    pub project_root: PathBuf,
}

impl ResolveKey {
    #[must_use]
    pub fn new(specifier: &str, project_root: &Path) -> Self {
        Self {
            specifier: specifier.to_string(),
            project_root: project_root.to_path_buf(),
        }
    }
}

/// Cached resolution entry.
#[derive(Debug, Clone)]
pub struct CachedResolution {
    /// The resolved file.
    pub resolved: PathBuf,
    /// Manifest the resolution depended on.
    pub manifest: PathBuf,
    /// Manifest stamp at resolution time.
    pub stamp: ManifestStamp,
}

/// Trait for caching bare-import resolutions.
///
/// Implementations should be thread-safe (Send + Sync).
pub trait ResolveCache: Send + Sync + std::fmt::Debug {
    /// Look up a resolution. Returns None if not cached or stale.
    fn get(&self, key: &ResolveKey) -> Option<PathBuf>;

    /// Store a resolution along with the manifest it was read from.
    fn set(&self, key: ResolveKey, resolved: PathBuf, manifest: &Path);
}

/// No-op cache implementation (always misses, never stores).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolveCache;

impl ResolveCache for NoResolveCache {
    fn get(&self, _key: &ResolveKey) -> Option<PathBuf> {
        None
    }

    fn set(&self, _key: ResolveKey, _resolved: PathBuf, _manifest: &Path) {
        // No-op
    }
}

/// In-memory cache with manifest-stamp invalidation.
#[derive(Debug, Default)]
pub struct MemoryResolveCache {
    entries: RwLock<HashMap<ResolveKey, CachedResolution>>,
}

impl MemoryResolveCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry that depended on `manifest`.
    pub fn invalidate_manifest(&self, manifest: &Path) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.manifest != manifest);
        before - entries.len()
    }
}

impl ResolveCache for MemoryResolveCache {
    fn get(&self, key: &ResolveKey) -> Option<PathBuf> {
        let stale = {
            let entries = self.entries.read();
            let entry = entries.get(key)?;
            if entry.stamp.matches(&entry.manifest) && entry.resolved.exists() {
                return Some(entry.resolved.clone());
            }
            true
        };

        if stale {
            self.entries.write().remove(key);
        }
        None
    }

    fn set(&self, key: ResolveKey, resolved: PathBuf, manifest: &Path) {
        let entry = CachedResolution {
            resolved,
            manifest: manifest.to_path_buf(),
            stamp: ManifestStamp::from_path(manifest),
        };
        self.entries.write().insert(key, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_stamp_matches() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("package.json");
        fs::write(&file, r#"{"name": "test"}"#).unwrap();

        let stamp = ManifestStamp::from_path(&file);
        assert!(stamp.mtime_ms.is_some());
        assert!(stamp.matches(&file));
    }

    #[test]
    fn test_stamp_mismatch_after_write() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("package.json");
        fs::write(&file, r#"{"name": "test"}"#).unwrap();

        let stamp = ManifestStamp::from_path(&file);
        fs::write(&file, r#"{"name": "modified"}"#).unwrap();

        // Size changed
        assert!(!stamp.matches(&file));
    }

    #[test]
    fn test_stamp_nonexistent_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("nonexistent.json");
        let stamp = ManifestStamp::from_path(&file);
        assert!(stamp.size.is_none());
        assert!(!stamp.matches(&file));
    }

    #[test]
    fn test_no_cache_always_misses() {
        let cache = NoResolveCache;
        let key = ResolveKey::new("react", Path::new("/project"));
        cache.set(key.clone(), PathBuf::from("/x.js"), Path::new("/p.json"));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_memory_cache_hit_and_manifest_invalidation() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("package.json");
        let entry = dir.path().join("index.js");
        fs::write(&manifest, r#"{"main":"index.js"}"#).unwrap();
        fs::write(&entry, "export default 1;").unwrap();

        let cache = MemoryResolveCache::new();
        let key = ResolveKey::new("pkg", dir.path());
        cache.set(key.clone(), entry.clone(), &manifest);
        assert_eq!(cache.get(&key), Some(entry));

        fs::write(&manifest, r#"{"main":"other.js","module":"x"}"#).unwrap();
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_manifest() {
        let cache = MemoryResolveCache::new();
        let manifest = Path::new("/nm/pkg/package.json");
        cache.set(
            ResolveKey::new("pkg", Path::new("/a")),
            PathBuf::from("/nm/pkg/index.js"),
            manifest,
        );
        cache.set(
            ResolveKey::new("other", Path::new("/a")),
            PathBuf::from("/nm/other/index.js"),
            Path::new("/nm/other/package.json"),
        );

        assert_eq!(cache.invalidate_manifest(manifest), 1);
        assert_eq!(cache.len(), 1);
    }
}
