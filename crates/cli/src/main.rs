//! Moldeo CLI — the main entry point.
//!
//! Commands:
//! - `eval`    — Evaluate a schema file against a store document
//! - `keys`    — List the schema vocabulary and registered operators
//! - `config`  — Show, locate or validate configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use moldeo_config::{EngineConfig, LogFormat};

mod commands;

#[derive(Parser)]
#[command(
    name = "moldeo",
    about = "Moldeo — declarative schema evaluation",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ~/.moldeo/config.toml)
    #[arg(short, long, global = true, env = "MOLDEO_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a schema against a store
    Eval(commands::eval::EvalArgs),

    /// List schema keys and operators
    Keys,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the default configuration file
    Default,
    /// Print the configuration file path
    Path,
    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| EngineConfig::config_dir().join("config.toml"));

    if let Commands::Config { action } = &cli.command {
        return match action {
            ConfigAction::Show => commands::config_cmd::show(&config_path),
            ConfigAction::Default => commands::config_cmd::default(),
            ConfigAction::Path => commands::config_cmd::path(&config_path),
            ConfigAction::Validate => commands::config_cmd::validate(&config_path),
        };
    }

    let config = EngineConfig::load_with_env(&config_path)
        .map_err(|e| format!("Failed to load config: {e}"))?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Eval(args) => commands::eval::run(config, args).await?,
        Commands::Keys => commands::keys::run(),
        Commands::Config { .. } => {}
    }

    Ok(())
}

/// Logs go to stderr so stdout carries only evaluation output.
fn init_tracing(config: &EngineConfig, verbose: bool) {
    let filter = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
