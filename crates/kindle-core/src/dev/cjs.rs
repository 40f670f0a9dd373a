//! CommonJS to ES module rewriting.
//!
//! Line-oriented pattern passes, applied in a fixed order:
//!
//! 1. lift unbound `require(...)` calls to `(await import(...)).default`,
//!    wrapping the unit in an async IIFE when nothing else makes it a module
//! 2. turn top-level `const .. = require(..)` declarations into imports
//! 3. turn `exports.x = ..` / `module.exports = ..` into export declarations
//! 4. repair `.js` paths that only exist on disk as `.mjs`
//! 5. replace `__filename` / `__dirname`
//!
//! This is not a parser. Input it does not recognize passes through as is,
//! and it never fails.

use regex_lite::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Extension appended to extensionless relative imports.
pub const DEFAULT_EXTENSION: &str = ".js";

/// Sibling extension tried when the default one is missing on disk.
pub const FALLBACK_EXTENSION: &str = ".mjs";

const IDENT: &str = r"[A-Za-z_$][\w$]*";
const QUOTED: &str = r#"['"`]([^'"`]+)['"`]"#;

static DEFAULT_REQUIRE: OnceLock<Option<Regex>> = OnceLock::new();
static DESTRUCTURED_REQUIRE: OnceLock<Option<Regex>> = OnceLock::new();
static MEMBER_REQUIRE: OnceLock<Option<Regex>> = OnceLock::new();
static FACTORY_REQUIRE: OnceLock<Option<Regex>> = OnceLock::new();
static NAMED_EXPORT: OnceLock<Option<Regex>> = OnceLock::new();
static MODULE_EXPORT: OnceLock<Option<Regex>> = OnceLock::new();
static DEFINE_PROPERTY: OnceLock<Option<Regex>> = OnceLock::new();
static OBJECT_EXPORT: OnceLock<Option<Regex>> = OnceLock::new();
static JS_PATH: OnceLock<Option<Regex>> = OnceLock::new();
static FILENAME: OnceLock<Option<Regex>> = OnceLock::new();
static DIRNAME: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, init: impl FnOnce() -> String) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(&init()).ok()).as_ref()
}

fn default_require() -> Option<&'static Regex> {
    cached(&DEFAULT_REQUIRE, || {
        format!(r"^(?:const|let|var)\s+({IDENT})\s*=\s*require\(\s*{QUOTED}\s*\)\s*;?\s*$")
    })
}

fn destructured_require() -> Option<&'static Regex> {
    cached(&DESTRUCTURED_REQUIRE, || {
        format!(r"^(?:const|let|var)\s*\{{([^}}]*)\}}\s*=\s*require\(\s*{QUOTED}\s*\)\s*;?\s*$")
    })
}

fn member_require() -> Option<&'static Regex> {
    cached(&MEMBER_REQUIRE, || {
        format!(
            r"^(?:const|let|var)\s+({IDENT})\s*=\s*require\(\s*{QUOTED}\s*\)\.({IDENT})\s*;?\s*$"
        )
    })
}

fn factory_require() -> Option<&'static Regex> {
    cached(&FACTORY_REQUIRE, || {
        format!(r"^(?:const|let|var)\s+({IDENT})\s*=\s*require\(\s*{QUOTED}\s*\)\((.*)\)\s*;?\s*$")
    })
}

fn named_export() -> Option<&'static Regex> {
    cached(&NAMED_EXPORT, || format!(r"^(?:module\.)?exports\.({IDENT})\s*=\s*"))
}

fn module_export() -> Option<&'static Regex> {
    cached(&MODULE_EXPORT, || r"^module\.exports\s*=\s*".to_string())
}

fn define_property() -> Option<&'static Regex> {
    cached(&DEFINE_PROPERTY, || {
        r#"Object\.defineProperty\(\s*exports\s*,\s*['"]([\w$]+)['"]\s*,\s*\{[^}]*?value:\s*([^\s,}]+)[^}]*\}\s*\)\s*;?"#
            .to_string()
    })
}

fn object_export() -> Option<&'static Regex> {
    cached(&OBJECT_EXPORT, || r"(?m)^module\.exports\s*=\s*\{([^{}]*)\}\s*;?".to_string())
}

fn js_path() -> Option<&'static Regex> {
    cached(&JS_PATH, || r#"(['"])(\.{1,2}/[^'"\n]*?)\.js(['"])"#.to_string())
}

fn filename_global() -> Option<&'static Regex> {
    cached(&FILENAME, || r"\b__filename\b".to_string())
}

fn dirname_global() -> Option<&'static Regex> {
    cached(&DIRNAME, || r"\b__dirname\b".to_string())
}

/// Rewrite CommonJS source into ES module source.
///
/// `file_path` is the absolute path of the file, used for extension repair.
#[must_use]
pub fn rewrite_cjs(source: &str, file_path: &Path) -> String {
    let out = lift_dynamic_requires(source, file_path);
    let out = normalize_imports(&out);
    let out = normalize_exports(&out);
    let out = repair_extensions(&out, file_path);
    replace_path_globals(&out)
}

// ============================================================================
// Pass 1: dynamic require lift
// ============================================================================

/// Rewrite `require(x)` calls that are not one of the top-level declaration
/// shapes into `(await import(x)).default`.
#[must_use]
pub fn lift_dynamic_requires(source: &str, file_path: &Path) -> String {
    let mut lifted = false;
    let mut pending_static = false;

    let out = map_lines(source, |line| {
        if is_bound_require(line) {
            pending_static = true;
            return line.to_string();
        }
        // Export lines become static syntax in pass 3; their right-hand side
        // is still an unbound load
        if is_cjs_export(line) {
            pending_static = true;
        }
        if is_comment(line) || !line.contains("require(") {
            return line.to_string();
        }

        let (rewritten, changed) = lift_line(line);
        lifted |= changed;
        rewritten
    });

    if lifted && !pending_static && !has_static_syntax(&out) && !has_async_wrapper(&out) {
        debug!(file = %file_path.display(), "wrapping module in async IIFE for lifted require");
        let trailing = if out.ends_with('\n') { "\n" } else { "" };
        return format!("(async () => {{\n{}\n}})();{trailing}", out.trim_end_matches('\n'));
    }

    out
}

/// Lift every `require(...)` call on one line. Returns the new line and
/// whether anything changed.
fn lift_line(line: &str) -> (String, bool) {
    let mut result = String::with_capacity(line.len() + 32);
    let mut remaining = line;
    let mut changed = false;

    while let Some(idx) = remaining.find("require(") {
        let (before, from_call) = remaining.split_at(idx);
        result.push_str(before);

        let boundary_ok = !before
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');
        let args_start = "require(".len();

        match find_closing_paren(&from_call[args_start..]) {
            Some(len) if boundary_ok => {
                let args = &from_call[args_start..args_start + len];
                result.push_str("(await import(");
                result.push_str(args);
                result.push_str(")).default");
                remaining = &from_call[args_start + len + 1..];
                changed = true;
            }
            _ => {
                result.push_str(&from_call[..args_start]);
                remaining = &from_call[args_start..];
            }
        }
    }

    result.push_str(remaining);
    (result, changed)
}

/// Length of the argument text before the `)` closing an already-open call.
/// String literals are skipped so parentheses inside them do not count.
fn find_closing_paren(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_bound_require(line: &str) -> bool {
    [default_require(), destructured_require(), member_require(), factory_require()]
        .into_iter()
        .flatten()
        .any(|re| re.is_match(line))
}

fn is_cjs_export(line: &str) -> bool {
    line.starts_with("exports.")
        || line.starts_with("module.exports")
        || line.starts_with("Object.defineProperty(exports")
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

/// Whether any line already carries a static `import`/`export`.
fn has_static_syntax(code: &str) -> bool {
    code.lines().map(str::trim_start).any(|l| {
        l.starts_with("import ")
            || l.starts_with("import{")
            || l.starts_with("import\"")
            || l.starts_with("import'")
            || l.starts_with("export ")
            || l.starts_with("export{")
    })
}

fn has_async_wrapper(code: &str) -> bool {
    code.contains("async function") || code.contains("(async () =>") || code.contains("(async()=>")
}

// ============================================================================
// Pass 2: import normalization
// ============================================================================

/// Convert top-level `require` declarations into import statements.
///
/// - `const X = require('m')` → `import X from 'm'` (or `import * as X`
///   when `X.member` is used anywhere in the unit)
/// - `const { a, b: c } = require('m')` → `import { a, b as c } from 'm'`
/// - `const X = require('m').y` → `import { y as X } from 'm'`
/// - `const X = require('m')(args)` → import of `XFactory` plus a call
#[must_use]
pub fn normalize_imports(source: &str) -> String {
    map_lines(source, |line| {
        if !line.contains("require(") {
            return line.to_string();
        }

        if let Some(caps) = member_require().and_then(|re| re.captures(line)) {
            return format!(
                "import {{ {} as {} }} from \"{}\";",
                &caps[3],
                &caps[1],
                apply_extension_rule(&caps[2])
            );
        }

        if let Some(caps) = factory_require().and_then(|re| re.captures(line)) {
            let name = &caps[1];
            return format!(
                "import {name}Factory from \"{}\";\nconst {name} = {name}Factory({});",
                apply_extension_rule(&caps[2]),
                &caps[3]
            );
        }

        if let Some(caps) = destructured_require().and_then(|re| re.captures(line)) {
            let bindings = destructured_bindings(&caps[1]);
            return format!(
                "import {{ {bindings} }} from \"{}\";",
                apply_extension_rule(&caps[2])
            );
        }

        if let Some(caps) = default_require().and_then(|re| re.captures(line)) {
            let name = &caps[1];
            let module = apply_extension_rule(&caps[2]);
            if uses_member_access(source, name) {
                return format!("import * as {name} from \"{module}\";");
            }
            return format!("import {name} from \"{module}\";");
        }

        line.to_string()
    })
}

/// `a, b: c, d = 1` → `a, b as c, d`
fn destructured_bindings(pattern: &str) -> String {
    pattern
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let part = part.split('=').next().unwrap_or(part).trim();
            match part.split_once(':') {
                Some((imported, local)) => format!("{} as {}", imported.trim(), local.trim()),
                None => part.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn uses_member_access(source: &str, name: &str) -> bool {
    let pattern = format!(r"(^|[^\w$.]){}\.[A-Za-z_$]", regex_lite::escape(name));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(source))
}

/// Append the default extension to relative paths that have none.
#[must_use]
pub fn apply_extension_rule(module: &str) -> String {
    let is_relative = module.starts_with('.') || module.starts_with('/');
    if !is_relative || module.ends_with('/') {
        return module.to_string();
    }

    let file_name = module.rsplit('/').next().unwrap_or(module);
    if file_name.is_empty() || file_name == "." || file_name == ".." {
        return module.to_string();
    }
    if Path::new(file_name).extension().is_some() {
        return module.to_string();
    }

    format!("{module}{DEFAULT_EXTENSION}")
}

// ============================================================================
// Pass 3: export normalization
// ============================================================================

/// Convert CommonJS export assignments into export declarations.
#[must_use]
pub fn normalize_exports(source: &str) -> String {
    let mut out = source.to_string();

    if let Some(re) = define_property() {
        out = re
            .replace_all(&out, |caps: &Captures| {
                format!("export const {} = {};", &caps[1], &caps[2])
            })
            .into_owned();
    }

    if let Some(re) = object_export() {
        out = re
            .replace_all(&out, |caps: &Captures| object_export_statements(&caps[1]))
            .into_owned();
    }

    map_lines(&out, |line| {
        if let Some(caps) = named_export().and_then(|re| re.captures(line)) {
            let name = &caps[1];
            let rest = &line[caps[0].len()..];
            if name == "default" {
                return format!("export default {rest}");
            }
            return format!("export const {name} = {rest}");
        }
        if let Some(m) = module_export().and_then(|re| re.find(line)) {
            return format!("export default {}", &line[m.end()..]);
        }
        line.to_string()
    })
}

/// `a, b: c, d: 1 + 2` → `export const d = 1 + 2;` and `export { a, c as b };`
fn object_export_statements(props: &str) -> String {
    let mut consts = Vec::new();
    let mut names = Vec::new();

    for prop in props.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match prop.split_once(':') {
            Some((key, value)) => {
                let key = key.trim().trim_matches(|c| c == '"' || c == '\'');
                let value = value.trim();
                if is_identifier(value) {
                    if value == key {
                        names.push(key.to_string());
                    } else {
                        names.push(format!("{value} as {key}"));
                    }
                } else {
                    consts.push(format!("export const {key} = {value};"));
                }
            }
            None if is_identifier(prop) => names.push(prop.to_string()),
            None => {}
        }
    }

    let mut statements = consts;
    statements.push(format!("export {{ {} }};", names.join(", ")));
    statements.join("\n")
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// ============================================================================
// Pass 4: extension repair
// ============================================================================

/// Point `./x.js` at `./x.mjs` when only the latter exists next to the file.
#[must_use]
pub fn repair_extensions(source: &str, file_path: &Path) -> String {
    let Some(re) = js_path() else {
        return source.to_string();
    };
    let dir = file_path.parent().unwrap_or(Path::new("/"));

    re.replace_all(source, |caps: &Captures| {
        let (open, rel, close) = (&caps[1], &caps[2], &caps[3]);
        if open != close {
            return caps[0].to_string();
        }

        let literal = dir.join(format!("{rel}{DEFAULT_EXTENSION}"));
        let fallback = dir.join(format!("{rel}{FALLBACK_EXTENSION}"));
        if !literal.exists() && fallback.exists() {
            format!("{open}{rel}{FALLBACK_EXTENSION}{close}")
        } else {
            caps[0].to_string()
        }
    })
    .into_owned()
}

// ============================================================================
// Pass 5: global path references
// ============================================================================

/// Replace `__filename` / `__dirname` with `import.meta.url` equivalents.
#[must_use]
pub fn replace_path_globals(source: &str) -> String {
    let mut out = source.to_string();
    if let Some(re) = filename_global() {
        out = re
            .replace_all(&out, "new URL(import.meta.url).pathname")
            .into_owned();
    }
    if let Some(re) = dirname_global() {
        out = re
            .replace_all(&out, "new URL(\".\", import.meta.url).pathname")
            .into_owned();
    }
    out
}

/// Map each line, keeping the presence or absence of a trailing newline.
fn map_lines(source: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut result = String::with_capacity(source.len());
    for line in source.lines() {
        result.push_str(&f(line));
        result.push('\n');
    }
    if !source.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }
    result
}
