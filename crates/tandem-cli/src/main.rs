//! Tandem CLI
//!
//! Couple secrets, single-envelope encryption, and a local walkthrough of
//! the offline outbox.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(author, version, about = "Tandem - End-to-end encrypted messaging for couples", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage couple secrets
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Encrypt a message into an envelope (JSON on stdout)
    Encrypt {
        /// Couple secret (64 hex characters)
        #[arg(short, long, env = "TANDEM_SECRET", hide_env_values = true)]
        secret: String,

        /// Message text, or content JSON with --json
        input: String,

        /// Treat input as message content JSON
        #[arg(long)]
        json: bool,
    },

    /// Decrypt an envelope
    Decrypt {
        /// Couple secret (64 hex characters)
        #[arg(short, long, env = "TANDEM_SECRET", hide_env_values = true)]
        secret: String,

        /// Base64 ciphertext
        ciphertext: String,

        /// Base64 IV
        iv: String,
    },

    /// Run two partners against an in-memory backend
    Demo {
        /// Persist the sender's outbox to the configured state file
        #[arg(long)]
        persist: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SecretAction {
    /// Generate a new couple secret
    Generate,
    /// Print the verification hash of a secret
    Hash {
        /// Couple secret (64 hex characters)
        secret: String,
    },
    /// Check a secret against a stored hash
    Verify {
        /// Couple secret (64 hex characters)
        secret: String,
        /// Stored verification hash
        hash: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the config file path
    Path,
}

fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("tandem_cli=debug,tandem_core=debug");
    }

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // A broken config file should not prevent `config init` from running
        let level = config::ConfigManager::load()
            .map(|c| c.log_level)
            .unwrap_or_else(|_| "warn".to_string());
        EnvFilter::new(format!("tandem_cli={0},tandem_core={0}", level))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    info!("Starting Tandem CLI");

    let result = match cli.command {
        Commands::Secret { action } => match action {
            SecretAction::Generate => commands::secret::generate().await,
            SecretAction::Hash { secret } => commands::secret::hash(&secret).await,
            SecretAction::Verify { secret, hash } => commands::secret::verify(&secret, &hash).await,
        },
        Commands::Encrypt {
            secret,
            input,
            json,
        } => commands::crypt::encrypt(&secret, &input, json).await,
        Commands::Decrypt {
            secret,
            ciphertext,
            iv,
        } => commands::crypt::decrypt(&secret, &ciphertext, &iv).await,
        Commands::Demo { persist } => {
            commands::demo::run(commands::demo::DemoOptions { persist }).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show().await,
            ConfigAction::Init { force } => commands::config::init(force).await,
            ConfigAction::Path => commands::config::path().await,
        },
    };

    if let Err(ref e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    result
}
