#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod dev;
pub mod error;
pub mod plugin;
pub mod resolver;
pub mod version;

pub use config::{load_config, DevConfig};
pub use error::Error;
pub use plugin::{Hook, PipelineError, PluginPipeline, PluginSettings, TransformPlugin};
pub use resolver::{resolve_bare, BareSpecifier, ResolveError, Resolver};
pub use version::VERSION;
