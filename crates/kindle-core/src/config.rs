//! Project configuration (`kindle.config.json`).

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file looked up in the project root.
pub const CONFIG_FILE: &str = "kindle.config.json";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_LIVE_UPDATE_PORT: u16 = 5001;
pub const DEFAULT_ENTRY: &str = "/src/main.jsx";
pub const DEFAULT_MODE: &str = "development";

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Live-update socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LiveUpdateConfig {
    pub port: u16,
}

impl Default for LiveUpdateConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_LIVE_UPDATE_PORT,
        }
    }
}

/// Dev server configuration. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DevConfig {
    pub server: ServerConfig,
    pub live_update: LiveUpdateConfig,
    /// Application entry module, as a root-relative URL.
    pub entry: String,
    /// Transform plugins by name, in pipeline order.
    pub plugins: Vec<String>,
    /// Cache bare-import resolutions across requests.
    pub resolve_cache: bool,
    /// Literal replacements applied to project sources.
    pub define: BTreeMap<String, String>,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            live_update: LiveUpdateConfig::default(),
            entry: DEFAULT_ENTRY.to_string(),
            plugins: vec!["env".to_string(), "css".to_string()],
            resolve_cache: false,
            define: BTreeMap::new(),
        }
    }
}

impl DevConfig {
    /// Parse config JSON. `path` is only used for error messages.
    pub fn from_json(source: &str, path: &Path) -> Result<Self, Error> {
        serde_json::from_str(source).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Find the config file in the given root directory.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    let path = root.join(CONFIG_FILE);
    path.is_file().then_some(path)
}

/// Load configuration for a project.
///
/// If `config_path` is `Some`, that file must exist (relative paths are
/// taken from `root`). Otherwise the root is searched for [`CONFIG_FILE`]
/// and defaults are used when there is none.
pub fn load_config(root: &Path, config_path: Option<&Path>) -> Result<(Option<PathBuf>, DevConfig), Error> {
    let path = match config_path {
        Some(p) => {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        }
        None => match find_config_file(root) {
            Some(p) => p,
            None => return Ok((None, DevConfig::default())),
        },
    };

    let source = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;
    let config = DevConfig::from_json(&source, &path)?;
    Ok((Some(path), config))
}
