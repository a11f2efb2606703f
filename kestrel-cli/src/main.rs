//! Kestrel CLI - analyse a project described by a manifest

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tracing::error;

mod commands;
mod config;
mod format;

use commands::*;
use config::CliConfig;
use format::OutputFormat;

/// Kestrel semantic analyzer
#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Type resolution and semantic analysis for Kestrel projects")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyse every source unit and print diagnostics
    Check {
        /// Project manifest (kestrel.toml)
        manifest: PathBuf,
        /// Only analyse this module
        #[arg(short, long)]
        module: Option<String>,
        /// Output format (text, json)
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Print every supertype of a class
    Supertypes {
        manifest: PathBuf,
        /// Use-site module
        module: String,
        /// Fully qualified class name
        class: String,
        /// Leave local and anonymous classes out
        #[arg(long)]
        approximate: bool,
    },

    /// Print a module's visible modules, dependsOn closure and cycles
    Deps {
        manifest: PathBuf,
        module: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config = CliConfig::load(cli.config.as_deref())?;
    if !config.color {
        colored::control::set_override(false);
    }

    let result = match cli.command {
        Commands::Check { manifest, module, format } => {
            let format = match format {
                Some(format) => OutputFormat::from_str(&format)?,
                None => config.format,
            };
            check_command(&manifest, module.as_deref(), format).await
        }
        Commands::Supertypes {
            manifest,
            module,
            class,
            approximate,
        } => supertypes_command(&manifest, &module, &class, approximate).await,
        Commands::Deps { manifest, module } => deps_command(&manifest, &module).await,
    };

    match result {
        Ok(ExitStatus::Clean) => Ok(()),
        Ok(ExitStatus::Errors) => std::process::exit(1),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
