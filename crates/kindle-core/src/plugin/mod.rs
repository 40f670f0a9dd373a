//! Transform plugin pipeline.
//!
//! A plugin implements [`TransformPlugin`]; every hook has a default
//! implementation that passes the input through, so a plugin only overrides
//! the hooks it cares about.
//!
//! ## Example
//!
//! ```ignore
//! use kindle_core::plugin::{HookResult, TransformPlugin};
//! use futures::future::{self, BoxFuture};
//!
//! struct Banner;
//!
//! impl TransformPlugin for Banner {
//!     fn name(&self) -> &str { "banner" }
//!
//!     fn transform<'a>(&'a self, code: &'a str, _id: &'a str)
//!         -> BoxFuture<'a, HookResult<Option<String>>>
//!     {
//!         Box::pin(future::ready(Ok(Some(format!("// banner\n{code}")))))
//!     }
//! }
//! ```

mod builtin;

pub use builtin::{CssPlugin, DefinePlugin, EnvPlugin};

use crate::dev::env::ClientEnv;
use crate::error::Error;
use futures::future::{self, BoxFuture};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error raised by a plugin hook.
#[derive(Error, Debug)]
#[error("[{plugin}] {hook}: {message}")]
pub struct PluginError {
    /// Plugin name that caused the error.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    /// Error message.
    pub message: String,
}

impl PluginError {
    pub fn new(plugin: &str, hook: Hook, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.to_string(),
            hook: hook.as_str(),
            message: message.into(),
        }
    }
}

/// A pipeline failure. The chain stops at the first failing plugin.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("plugin #{plugin_index} `{plugin}` failed on {module_id}: {source}")]
    PluginTransform {
        plugin_index: usize,
        plugin: String,
        module_id: String,
        #[source]
        source: PluginError,
    },
}

/// Hooks a plugin may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// Module source, keyed by absolute file path.
    Transform,
    /// The entry HTML page, keyed by its absolute file path.
    TransformIndexHtml,
}

impl Hook {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::TransformIndexHtml => "transformIndexHtml",
        }
    }
}

/// The plugin contract.
///
/// Returning `Ok(None)` passes the input through unchanged.
pub trait TransformPlugin: Send + Sync {
    /// Plugin name for logs and error messages.
    fn name(&self) -> &str;

    /// Transform module source code.
    fn transform<'a>(
        &'a self,
        _code: &'a str,
        _id: &'a str,
    ) -> BoxFuture<'a, HookResult<Option<String>>> {
        Box::pin(future::ready(Ok(None)))
    }

    /// Transform the entry HTML page.
    fn transform_index_html<'a>(
        &'a self,
        _html: &'a str,
        _id: &'a str,
    ) -> BoxFuture<'a, HookResult<Option<String>>> {
        Box::pin(future::ready(Ok(None)))
    }
}

/// Inputs the built-in plugins are created from.
#[derive(Debug, Clone, Default)]
pub struct PluginSettings {
    /// `import.meta.env` values.
    pub env: ClientEnv,
    /// Literal replacements applied before any named plugin.
    pub define: BTreeMap<String, String>,
}

/// Ordered, immutable list of plugins.
#[derive(Clone, Default)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn TransformPlugin>>,
}

impl std::fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

impl PluginPipeline {
    #[must_use]
    pub fn new(plugins: Vec<Arc<dyn TransformPlugin>>) -> Self {
        Self { plugins }
    }

    /// Build the pipeline from configured plugin names.
    ///
    /// Known names are `env` and `css`. A non-empty `define` table adds a
    /// [`DefinePlugin`] at the front.
    pub fn from_names(names: &[String], settings: &PluginSettings) -> Result<Self, Error> {
        let mut plugins: Vec<Arc<dyn TransformPlugin>> = Vec::with_capacity(names.len() + 1);

        if !settings.define.is_empty() {
            plugins.push(Arc::new(DefinePlugin::new(settings.define.clone())));
        }

        for name in names {
            let plugin: Arc<dyn TransformPlugin> = match name.as_str() {
                "env" => Arc::new(EnvPlugin::new(settings.env.clone())),
                "css" => Arc::new(CssPlugin),
                other => {
                    return Err(Error::UnknownPlugin {
                        name: other.to_string(),
                    })
                }
            };
            plugins.push(plugin);
        }

        Ok(Self { plugins })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugin names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.name())
    }

    /// Run `hook` over every plugin in order, threading each output into
    /// the next plugin's input.
    pub async fn apply(
        &self,
        hook: Hook,
        code: &str,
        module_id: &str,
    ) -> Result<String, PipelineError> {
        let mut result = code.to_string();

        for (index, plugin) in self.plugins.iter().enumerate() {
            let output = match hook {
                Hook::Transform => plugin.transform(&result, module_id).await,
                Hook::TransformIndexHtml => plugin.transform_index_html(&result, module_id).await,
            };

            match output {
                Ok(Some(code)) => {
                    debug!(plugin = plugin.name(), hook = hook.as_str(), module_id, "transformed");
                    result = code;
                }
                Ok(None) => {}
                Err(source) => {
                    warn!(
                        plugin_index = index,
                        plugin = plugin.name(),
                        module_id,
                        error = %source,
                        "plugin failed"
                    );
                    return Err(PipelineError::PluginTransform {
                        plugin_index: index,
                        plugin: plugin.name().to_string(),
                        module_id: module_id.to_string(),
                        source,
                    });
                }
            }
        }

        Ok(result)
    }
}
