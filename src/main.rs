use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use jpad_cli::Engine;
use tracing_subscriber::EnvFilter;

/// Compile and evaluate JPad rule documents.
#[derive(Parser, Debug)]
#[command(name = "jpad-cli", author, version, about)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile rules to check if a jpad is valid
    Compile {
        /// Path to jpad file
        jpad_file: PathBuf,
    },
    /// Calculate the rule value for a context
    Calc {
        /// Path to jpad file
        jpad_file: PathBuf,
        /// Context for calculation, repeatable
        #[arg(short, long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    // Parse CLI arguments.
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // One engine for the whole process.
    let engine = Engine::new();

    let outcome = match &cli.command {
        Command::Compile { jpad_file } => engine.validate_file(jpad_file).map(|()| "OK".to_string()),
        Command::Calc { jpad_file, context } => engine.calc_file(jpad_file, context),
    };

    match outcome {
        Ok(out) => println!("{out}"),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
