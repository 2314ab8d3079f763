pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "intentbot",
    about = "Intentbot operator CLI",
    long_about = "Inspect intentbot configuration, readiness, the intent catalog, and classifier output.",
    after_help = "Examples:\n  intentbot doctor --json\n  intentbot config\n  intentbot catalog --compact\n  intentbot classify \"не приходит код подтверждения\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, the intent catalog, platform reachability, and LLM credentials")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the intent catalog as it is rendered into the classifier prompt")]
    Catalog {
        #[arg(long, help = "Trim examples and emit single-line JSON")]
        compact: bool,
    },
    #[command(about = "Classify one utterance with the configured gateway and print the result")]
    Classify {
        #[arg(help = "Utterance to classify")]
        text: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Catalog { compact } => commands::catalog::run(compact),
        Command::Classify { text } => commands::classify::run(&text),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
