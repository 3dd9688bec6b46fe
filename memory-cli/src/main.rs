use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

mod commands;
mod engine;
mod errors;
mod output;

use commands::{maintenance, memory, selfimprove, MemoryCommands, SelfCommands};
use output::{print_error, print_result, OutputFormat};

#[derive(Parser)]
#[command(name = "memory-cli")]
#[command(about = "Command-line interface for the persistent knowledge memory engine")]
#[command(version, long_about = None)]
struct Cli {
    /// Root directory for on-disk state (defaults to $CLAUDE_MEMORY_DIR or ~/.claude-memory)
    #[arg(long, value_name = "DIR")]
    memory_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,

    /// Enable verbose (debug-level) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save/recall/lifecycle operations over knowledge items.
    #[command(alias = "mem")]
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// The self-improvement ledger: errors, insights, rules, patterns.
    #[command(alias = "self")]
    Selfimprove {
        #[command(subcommand)]
        command: SelfCommands,
    },
    /// Run the retention sweep (archive/purge aging knowledge).
    Maintenance {
        /// Report what would change without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate shell completion scripts.
    Completion {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Commands::Completion { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "memory-cli", &mut std::io::stdout());
        return Ok(());
    }

    let config = engine::load_config(cli.memory_dir);
    let dispatcher = match engine::build_dispatcher(&config).await {
        Ok(d) => d,
        Err(err) => {
            std::process::exit(print_error(cli.format, &err));
        }
    };

    let outcome = match cli.command {
        Commands::Memory { command } => memory::run(&dispatcher, command).await,
        Commands::Selfimprove { command } => selfimprove::run(&dispatcher, command).await,
        Commands::Maintenance { dry_run } => maintenance::run(&dispatcher, dry_run).await,
        Commands::Completion { .. } => unreachable!("handled above"),
    };

    match outcome {
        Ok((tool, value)) => {
            print_result(cli.format, tool, &value);
            Ok(())
        }
        Err(err) => std::process::exit(print_error(cli.format, &err)),
    }
}
