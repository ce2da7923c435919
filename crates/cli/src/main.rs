//! NVLP CLI — the main entry point.
//!
//! Commands:
//! - `rules`    — List, validate, export, or seed the rule catalog
//! - `evaluate` — Run one telemetry event through the engine
//! - `config`   — Show the effective or default configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "nvlp",
    about = "NVLP — adaptive learning rule engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.nvlp/config.toml)
    #[arg(short, long, global = true, env = "NVLP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage adaptive rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Evaluate a telemetry event against the catalog
    Evaluate {
        /// Telemetry event as JSON, or @path to read it from a file
        #[arg(short, long)]
        event: String,

        /// Learner profile tags, comma separated
        #[arg(short, long, value_delimiter = ',')]
        profile: Vec<String>,

        /// Learner's preferred learning style
        #[arg(long)]
        learning_style: Option<String>,

        /// Print the evaluation as JSON
        #[arg(long)]
        raw: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// List rules in priority order
    List,

    /// Check a rule file; exits non-zero if any rule is invalid
    Validate {
        /// Rule file (default: catalog.rules_file from config)
        file: Option<PathBuf>,
    },

    /// Print the effective catalog as rule-definition JSON
    Export,

    /// Write the built-in neuro rules into a rule file
    Seed {
        /// Rule file (default: catalog.rules_file, or ~/.nvlp/rules.json)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the default configuration
    Default,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Rules { action } => match action {
            RulesAction::List => commands::rules::list(config_path)?,
            RulesAction::Validate { file } => commands::rules::validate(config_path, file)?,
            RulesAction::Export => commands::rules::export(config_path)?,
            RulesAction::Seed { file } => commands::rules::seed(config_path, file)?,
        },
        Commands::Evaluate {
            event,
            profile,
            learning_style,
            raw,
        } => commands::evaluate::run(config_path, &event, profile, learning_style, raw).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Default => commands::config_cmd::default(),
            ConfigAction::Path => commands::config_cmd::path(config_path),
        },
    }

    Ok(())
}
