#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kindle")]
#[command(author, version, about = "An unbundled development server with live updates", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Start the development server
    Dev {
        /// Project root (defaults to the working directory)
        root: Option<PathBuf>,

        /// HTTP port to listen on
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Port of the live-update socket
        #[arg(long)]
        live_port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Mode; selects which .env files are loaded
        #[arg(long, short = 'm', default_value = "development")]
        mode: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Dev {
            root,
            port,
            live_port,
            host,
            config,
            mode,
        }) => {
            let root = match root {
                Some(root) if root.is_absolute() => root,
                Some(root) => cwd.join(root),
                None => cwd,
            };
            let action = commands::dev::DevAction {
                root,
                port,
                live_port,
                host,
                config,
                mode,
            };

            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::dev::run(action))
        }
    }
}
