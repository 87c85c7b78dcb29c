//! Command-line launcher for the geodist roles.

use clap::{Parser, Subcommand};
use std::process;

mod commands;

use commands::{coordinator, evaluator, worker};

/// geodist - distributed discrete-geodesic solver
#[derive(Parser)]
#[command(name = "geodist")]
#[command(author = "Geodist Contributors")]
#[command(version)]
#[command(about = "Distributed curve-shortening for discrete geodesics", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator that owns the global curve
    #[command(visible_alias = "c")]
    Coordinator(coordinator::CoordinatorArgs),

    /// Run a worker that solves local geodesic problems
    #[command(visible_alias = "w")]
    Worker(worker::WorkerArgs),

    /// Run a metric evaluator for a worker's pool
    #[command(visible_alias = "e")]
    Evaluator(evaluator::EvaluatorArgs),

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Execute command
    let result = match cli.command {
        Commands::Coordinator(args) => coordinator::execute(args, cli.verbose).await,
        Commands::Worker(args) => worker::execute(args, cli.verbose).await,
        Commands::Evaluator(args) => evaluator::execute(args, cli.verbose).await,
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if cli.verbose {
            eprintln!("\nCaused by:");
            for cause in e.chain().skip(1) {
                eprintln!("  {}", cause);
            }
        }
        process::exit(1);
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
