//! Environment values for served code.
//!
//! [`ClientEnv`] answers `import.meta.env.KEY` lookups for project sources;
//! [`substitute_dependency_env`] removes `process` references from
//! dependencies so they run in the browser.

use regex_lite::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Mode that makes `import.meta.env.DEV` true.
pub const DEVELOPMENT_MODE: &str = "development";

static PROCESS_REF: OnceLock<Option<Regex>> = OnceLock::new();

/// `.env` files read for `mode`, lowest precedence first.
#[must_use]
pub fn env_file_names(mode: &str) -> [String; 4] {
    [
        ".env".to_string(),
        ".env.local".to_string(),
        format!(".env.{mode}"),
        format!(".env.{mode}.local"),
    ]
}

/// Read `KEY=value` lines. Blank lines, `#` comments and lines without a key
/// are skipped; a value wrapped in matching quotes loses the quotes.
pub fn parse_dotenv(content: &str) -> impl Iterator<Item = (String, String)> + '_ {
    content.lines().filter_map(|line| {
        let line = line.trim();
        if line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        Some((key.to_string(), unquote(value.trim()).to_string()))
    })
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|q| value.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(value)
}

/// Merge the `.env` files under `root` for `mode`; later files win.
/// Missing or unreadable files are skipped.
#[must_use]
pub fn load_env_files(root: &Path, mode: &str) -> HashMap<String, String> {
    env_file_names(mode)
        .iter()
        .filter_map(|name| std::fs::read_to_string(root.join(name)).ok())
        .fold(HashMap::new(), |mut vars, content| {
            vars.extend(parse_dotenv(&content));
            vars
        })
}

/// Values visible to application code as `import.meta.env.*`.
#[derive(Debug, Clone, Default)]
pub struct ClientEnv {
    mode: String,
    vars: HashMap<String, String>,
}

impl ClientEnv {
    /// Build from `.env` files under `root` for `mode`.
    #[must_use]
    pub fn load(root: &Path, mode: &str) -> Self {
        Self::new(mode, load_env_files(root, mode))
    }

    #[must_use]
    pub fn new(mode: &str, vars: HashMap<String, String>) -> Self {
        Self {
            mode: mode.to_string(),
            vars,
        }
    }

    #[must_use]
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// JavaScript literal for `import.meta.env.<key>`.
    ///
    /// `MODE`, `DEV` and `PROD` are built in. Other keys come from the
    /// process environment, then the `.env` files, then the empty string.
    #[must_use]
    pub fn literal(&self, key: &str) -> String {
        let is_dev = self.mode == DEVELOPMENT_MODE;
        match key {
            "MODE" => json_string(&self.mode),
            "DEV" => is_dev.to_string(),
            "PROD" => (!is_dev).to_string(),
            _ => {
                let value = std::env::var(key)
                    .ok()
                    .or_else(|| self.vars.get(key).cloned())
                    .unwrap_or_default();
                json_string(&value)
            }
        }
    }
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Prepare dependency code for the browser: `process.env.NODE_ENV` becomes
/// `"development"`, `process.env.BROWSER` becomes `true`, and any remaining
/// `process` reference becomes `{}`.
#[must_use]
pub fn substitute_dependency_env(code: &str) -> String {
    let code = code
        .replace("process.env.NODE_ENV", "\"development\"")
        .replace("process.env.BROWSER", "true");

    let re = PROCESS_REF.get_or_init(|| Regex::new(r"\bprocess\b").ok());
    match re {
        Some(re) => re.replace_all(&code, "{}").into_owned(),
        None => code,
    }
}
