//! Import specifier rewriting for unbundled dev serving.
//!
//! [`rewrite_specifiers`] finds the string literal of every static
//! import/export-from statement and every `import("...")` call, and lets a
//! callback replace it. [`rewrite_bare_imports`] uses it to send bare
//! specifiers (`react`) to `/@modules/react`.

use std::ops::Range;

/// URL prefix of the module-resolution route.
pub const MODULES_PREFIX: &str = "/@modules/";

/// Rewrite every bare import specifier in `code` to `/@modules/<specifier>`.
#[must_use]
pub fn rewrite_bare_imports(code: &str) -> String {
    rewrite_specifiers(code, |specifier| {
        is_bare(specifier).then(|| format!("{MODULES_PREFIX}{specifier}"))
    })
}

/// Pass each import specifier in `code` to `map`; `Some` replaces it.
///
/// Quotes and everything outside the literal are kept.
pub fn rewrite_specifiers(code: &str, mut map: impl FnMut(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(code.len());

    for line in code.lines() {
        let trimmed = line.trim_start();
        let rewritten = if is_static_import(trimmed) || is_export_from(trimmed) {
            static_specifier_offset(line)
                .and_then(|offset| splice_literal(line, offset, &mut map))
        } else if line.contains("import(") {
            Some(rewrite_dynamic_imports(line, &mut map))
        } else {
            None
        };
        result.push_str(rewritten.as_deref().unwrap_or(line));
        result.push('\n');
    }

    if !code.ends_with('\n') {
        result.pop();
    }

    result
}

/// Bare: names a package. Relative (`.`), absolute (`/`), virtual (`\0`)
/// and URL-like (`http:`, `data:`) specifiers are not.
fn is_bare(specifier: &str) -> bool {
    !specifier.is_empty()
        && !specifier.starts_with('.')
        && !specifier.starts_with('/')
        && !specifier.starts_with('\0')
        && !specifier.contains("://")
        && !specifier.starts_with("data:")
}

fn is_static_import(trimmed: &str) -> bool {
    trimmed.starts_with("import ")
        && (trimmed.contains(" from ") || trimmed.contains('\'') || trimmed.contains('"'))
}

fn is_export_from(trimmed: &str) -> bool {
    trimmed.starts_with("export ") && trimmed.contains(" from ")
}

/// Where the specifier literal of a static statement may start: after
/// ` from `, or after the `import` keyword of a side-effect import.
fn static_specifier_offset(line: &str) -> Option<usize> {
    match line.find(" from ") {
        Some(idx) => Some(idx + " from ".len()),
        None => line.find("import").map(|idx| idx + "import".len()),
    }
}

/// Contents of the quoted literal `s` opens with, after optional whitespace.
fn literal_span(s: &str) -> Option<Range<usize>> {
    let start = s.len() - s.trim_start().len();
    let quote = s[start..].chars().next().filter(|&c| c == '\'' || c == '"')?;
    let inner = start + quote.len_utf8();
    let len = s[inner..].find(quote)?;
    Some(inner..inner + len)
}

/// Replace the literal found at `offset` in `line` when `map` returns `Some`.
fn splice_literal(
    line: &str,
    offset: usize,
    map: &mut impl FnMut(&str) -> Option<String>,
) -> Option<String> {
    let span = literal_span(&line[offset..])?;
    let (start, end) = (offset + span.start, offset + span.end);
    let replacement = map(&line[start..end])?;
    Some(format!("{}{replacement}{}", &line[..start], &line[end..]))
}

/// Rewrite the literal argument of each `import(...)` call. Non-literal
/// arguments are left alone.
fn rewrite_dynamic_imports(line: &str, map: &mut impl FnMut(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(idx) = rest.find("import(") {
        let (head, tail) = rest.split_at(idx + "import(".len());
        result.push_str(head);
        rest = tail;

        if let Some(span) = literal_span(rest) {
            let specifier = &rest[span.clone()];
            result.push_str(&rest[..span.start]);
            match map(specifier) {
                Some(replacement) => result.push_str(&replacement),
                None => result.push_str(specifier),
            }
            rest = &rest[span.end..];
        }
    }

    result.push_str(rest);
    result
}
