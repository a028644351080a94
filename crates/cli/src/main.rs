//! HASH AI worker: the main entry point.
//!
//! Commands:
//! - `run`:    Serve activities over stdio, plus the health endpoint
//! - `infer`:  Run one entity inference and print the result
//! - `config`: Show, validate or print the default configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "hash-ai-worker",
    about = "HASH AI worker: LLM dialogs and entity inference",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "HASH_AI_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = LogFormat::Text,
        env = "HASH_AI_LOG_FORMAT"
    )]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker: activities over stdin/stdout and the health server
    Run,

    /// Infer entities from a text file
    Infer {
        /// File holding the text to infer entities from
        #[arg(long)]
        text_file: PathBuf,

        /// JSON file holding an array of dereferenced entity types
        #[arg(long)]
        entity_types_file: PathBuf,

        /// Model to use
        #[arg(short, long)]
        model: String,

        /// Maximum completion tokens
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Extra instructions appended to the system prompt
        #[arg(long)]
        instructions: Option<String>,
    },

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
    /// Check the configuration, including worker-only settings
    Validate,
    /// Print the default configuration
    Default,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries activity results, so logs go to stderr
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run => commands::run::run(config).await?,
        Commands::Infer {
            text_file,
            entity_types_file,
            model,
            max_tokens,
            instructions,
        } => {
            let args = commands::infer::InferArgs {
                text_file,
                entity_types_file,
                model,
                max_tokens,
                instructions,
            };
            commands::infer::run(config, args).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config)?,
            ConfigAction::Validate => commands::config_cmd::validate(config)?,
            ConfigAction::Default => commands::config_cmd::default(),
        },
    }

    Ok(())
}
