mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{normalize, plan, NormalizeArgs, PlanArgs};

/// Trellis CLI - inspect how the component runtime plans and resolves things
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the definition fetch URIs a batch of descriptors produces
    Plan(PlanArgs),

    /// Print normalized forms of expressions
    Normalize(NormalizeArgs),
}

fn main() {
    trellis_runtime::init_tracing("warn");
    let cli = Cli::parse();

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir.display().to_string(),
        Err(_) => ".".to_string(),
    };

    let result = match cli.command {
        Command::Plan(args) => plan(args, &cwd),
        Command::Normalize(args) => normalize(args),
    };

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}
