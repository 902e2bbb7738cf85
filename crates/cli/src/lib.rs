pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use intake_core::config::{AppConfig, ConfigOverrides, LoadOptions};

use commands::replay::ReplayArgs;
use commands::run::RunArgs;

#[derive(Debug, Parser)]
#[command(
    name = "intake",
    about = "Service intake operator CLI",
    long_about = "Run intake conversations, replay transcripts, inspect configuration, and check readiness.",
    after_help = "Examples:\n  intake run\n  intake replay transcript.txt --session-id demo\n  intake doctor --json\n  intake config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to an intake TOML config file (must exist)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the configured log level")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run an interactive intake session on stdin/stdout")]
    Run {
        #[arg(long, help = "Session id to use instead of a generated one")]
        session_id: Option<String>,
        #[arg(long, help = "Session language, e.g. `en` or `es-MX`")]
        language: Option<String>,
    },
    #[command(about = "Replay a transcript file (one message per line) and print the intake result")]
    Replay {
        path: PathBuf,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        request_id: Option<String>,
        #[arg(long)]
        language: Option<String>,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, field registry, classifier locales, and run an engine smoke turn")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

fn init_logging(config: &AppConfig) {
    use intake_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // stdout carries command output; a subscriber may already be installed in tests.
    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        overrides: ConfigOverrides { log_level: cli.log_level, ..ConfigOverrides::default() },
    };

    if matches!(cli.command, Command::Run { .. } | Command::Replay { .. }) {
        if let Ok(config) = AppConfig::load(options.clone()) {
            init_logging(&config);
        }
    }

    let result = match cli.command {
        Command::Run { session_id, language } => {
            commands::run::run(&options, RunArgs { session_id, language })
        }
        Command::Replay { path, session_id, request_id, language } => {
            commands::replay::run(&options, ReplayArgs { path, session_id, request_id, language })
        }
        Command::Config => commands::config::run(&options),
        Command::Doctor { json } => commands::doctor::run(&options, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
