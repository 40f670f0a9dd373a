//! Built-in plugins.

use super::{HookResult, TransformPlugin};
use crate::dev::env::ClientEnv;
use futures::future::{self, BoxFuture};
use regex_lite::{Captures, Regex};
use std::collections::BTreeMap;

/// Replaces `import.meta.env.KEY` with a literal value.
#[derive(Debug)]
pub struct EnvPlugin {
    env: ClientEnv,
    pattern: Option<Regex>,
}

impl EnvPlugin {
    #[must_use]
    pub fn new(env: ClientEnv) -> Self {
        Self {
            env,
            pattern: Regex::new(r"import\.meta\.env\.([A-Za-z_$][\w$]*)").ok(),
        }
    }

    fn replace(&self, code: &str) -> Option<String> {
        let re = self.pattern.as_ref()?;
        if !re.is_match(code) {
            return None;
        }
        Some(
            re.replace_all(code, |caps: &Captures| self.env.literal(&caps[1]))
                .into_owned(),
        )
    }
}

impl TransformPlugin for EnvPlugin {
    fn name(&self) -> &str {
        "env"
    }

    fn transform<'a>(
        &'a self,
        code: &'a str,
        _id: &'a str,
    ) -> BoxFuture<'a, HookResult<Option<String>>> {
        Box::pin(future::ready(Ok(self.replace(code))))
    }
}

/// Turns a stylesheet into a module that injects it into the page.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssPlugin;

impl TransformPlugin for CssPlugin {
    fn name(&self) -> &str {
        "css"
    }

    fn transform<'a>(
        &'a self,
        code: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, HookResult<Option<String>>> {
        if !id.ends_with(".css") {
            return Box::pin(future::ready(Ok(None)));
        }
        Box::pin(future::ready(Ok(Some(create_css_module(code)))))
    }
}

fn create_css_module(css: &str) -> String {
    let css = serde_json::Value::String(css.to_string()).to_string();
    format!(
        r"const style = document.createElement('style');
style.setAttribute('data-kindle-css', '');
style.textContent = {css};
document.head.appendChild(style);
export default {{}};
"
    )
}

/// Replaces each configured key with its literal value.
#[derive(Debug, Default)]
pub struct DefinePlugin {
    replacements: BTreeMap<String, String>,
}

impl DefinePlugin {
    #[must_use]
    pub fn new(replacements: BTreeMap<String, String>) -> Self {
        Self { replacements }
    }
}

impl TransformPlugin for DefinePlugin {
    fn name(&self) -> &str {
        "define"
    }

    fn transform<'a>(
        &'a self,
        code: &'a str,
        _id: &'a str,
    ) -> BoxFuture<'a, HookResult<Option<String>>> {
        let mut result = code.to_string();
        let mut changed = false;

        for (from, to) in &self.replacements {
            if result.contains(from.as_str()) {
                result = result.replace(from.as_str(), to);
                changed = true;
            }
        }

        Box::pin(future::ready(Ok(changed.then_some(result))))
    }
}
