//! # bsweep CLI Entry Point
//!
//! This is the main executable for the `bsweep` command-line tool.
//! It parses CLI arguments using clap and routes commands to the appropriate handlers.
//!
//! ## Command Structure
//!
//! - **Build**: `build`, `clean`
//! - **Cache**: `cache stats`, `cache clean`
//! - **Catalog**: `boards`

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

use boardsweep::build;
use boardsweep::commands;
use boardsweep::commands::build::BuildRequest;
use boardsweep::commands::cache::CacheOp as CacheCommand;
use boardsweep::config;
use boardsweep::logging;

#[cfg(windows)]
#[link(name = "kernel32")]
unsafe extern "system" {
    fn SetConsoleOutputCP(wCodePageID: u32) -> i32;
}

#[cfg(windows)]
fn enable_windows_utf8_console() {
    unsafe {
        SetConsoleOutputCP(65001);
    }
}

#[cfg(not(windows))]
fn enable_windows_utf8_console() {}

#[derive(Parser)]
#[command(name = "bsweep")]
#[command(about = "Compile a library's examples across many boards", version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to sweep.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile examples for one or more boards
    Build {
        /// Examples to build (defaults to every example with a sketch)
        examples: Vec<String>,
        /// Comma-separated boards
        #[arg(long, value_delimiter = ',')]
        boards: Vec<String>,
        /// Comma-separated examples, in addition to positional ones
        #[arg(long = "examples", value_delimiter = ',')]
        examples_list: Vec<String>,
        /// Comma-separated examples to leave out
        #[arg(long, value_delimiter = ',')]
        exclude_examples: Vec<String>,
        /// Comma-separated preprocessor defines for every board
        #[arg(long, value_delimiter = ',')]
        defines: Vec<String>,
        /// Ignore the incremental cache and rebuild everything
        #[arg(long)]
        force_rebuild: bool,
        /// Delete cache entries before building
        #[arg(long)]
        clean_cache: bool,
        /// Maximum number of boards built in parallel
        #[arg(long, short = 'j')]
        workers: Option<usize>,
        /// Show full toolchain output and internal decisions
        #[arg(short, long)]
        verbose: bool,
        /// Override [project].build_dir
        #[arg(long)]
        build_dir: Option<PathBuf>,
        /// Do not let the toolchain install project dependencies during init
        #[arg(long)]
        skip_init: bool,
        /// Pick boards interactively
        #[arg(short, long)]
        interactive: bool,
        /// Do not re-run the first failure with verbose output
        #[arg(long)]
        no_verbose_on_failure: bool,
    },
    /// Remove build directories
    Clean {
        /// Comma-separated boards (defaults to all)
        #[arg(long, value_delimiter = ',')]
        boards: Vec<String>,
        /// Also clear the shared compiled-artifact cache
        #[arg(long)]
        artifacts: bool,
    },
    /// Inspect or clear the incremental build cache
    Cache {
        #[command(subcommand)]
        op: CacheOp,
    },
    /// List configured boards
    Boards,
}

#[derive(Subcommand)]
enum CacheOp {
    /// Show per-board cache statistics
    Stats,
    /// Clear cache entries
    Clean {
        /// Only this board
        #[arg(long)]
        board: Option<String>,
        /// Only this example
        #[arg(long)]
        example: Option<String>,
    },
}

fn main() {
    enable_windows_utf8_console();
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Build { verbose: true, .. });
    logging::init(verbose);

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "x".red(), e);
            std::process::exit(2);
        }
    }
}

/// `Ok(false)` means the command ran but something failed to build.
fn run(cli: Cli) -> Result<bool> {
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Build {
            examples,
            boards,
            examples_list,
            exclude_examples,
            defines,
            force_rebuild,
            clean_cache,
            workers,
            verbose,
            build_dir,
            skip_init,
            interactive,
            no_verbose_on_failure,
        } => {
            let request = BuildRequest {
                boards,
                examples: examples.into_iter().chain(examples_list).collect(),
                exclude_examples,
                defines,
                force_rebuild,
                clean_cache,
                workers,
                verbose,
                build_dir,
                skip_init,
                interactive,
                no_verbose_on_failure,
            };
            let report = commands::build::run_build(&config, &request)?;
            Ok(report.success())
        }
        Commands::Clean { boards, artifacts } => {
            build::clean(&config, &boards, artifacts)?;
            Ok(true)
        }
        Commands::Cache { op } => {
            let op = match op {
                CacheOp::Stats => CacheCommand::Stats,
                CacheOp::Clean { board, example } => CacheCommand::Clean { board, example },
            };
            commands::cache::handle_cache_command(&config, &op)?;
            Ok(true)
        }
        Commands::Boards => {
            commands::boards::list_boards(&config)?;
            Ok(true)
        }
    }
}
