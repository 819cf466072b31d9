mod commands;
mod logging;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use polyrun_common::Language;
use polyrun_sandbox::{Orchestrator, PolyrunConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "polyrun")]
#[command(about = "Run Python, R and JavaScript snippets in managed sandboxes")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: ~/.config/polyrun/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute one snippet and print its result
    Run {
        /// Language of the snippet (python, r, javascript)
        #[arg(short, long)]
        language: Language,

        /// Code to run
        #[arg(short = 'c', long, conflicts_with = "file")]
        code: Option<String>,

        /// Read the code from a file (stdin when neither is given)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Packages to install before running, comma separated
        #[arg(long, value_delimiter = ',')]
        install: Vec<String>,

        /// Download the generated file, if the result names one
        #[arg(long)]
        fetch: bool,

        /// Directory for plots and fetched files
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Print the raw result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve the JSON-lines session protocol on stdin/stdout
    Session,
    /// Print the effective configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Config { write } => {
            commands::config(cli.config.as_deref(), write)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            language,
            code,
            file,
            install,
            fetch,
            output,
            json,
        } => {
            let orchestrator = Orchestrator::native(&load_config(&cli.config)?);
            let args = commands::RunArgs {
                language,
                code,
                file,
                install,
                fetch,
                output,
                json,
            };
            commands::run(&orchestrator, args).await
        }
        Commands::Session => {
            let orchestrator = Orchestrator::native(&load_config(&cli.config)?);
            session::serve(orchestrator).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<PolyrunConfig> {
    let config = match path {
        Some(path) => PolyrunConfig::load_from(path)?,
        None => PolyrunConfig::load()?,
    };
    Ok(config)
}
