//! Config command - Inspect and initialize configuration

use crate::config::ConfigManager;
use anyhow::{Context, Result};
use colored::Colorize;
use tandem_core::TandemConfig;

/// Show the effective configuration
pub async fn show() -> Result<()> {
    let config = ConfigManager::load().context("Failed to load config")?;
    let home = ConfigManager::tandem_home()?;

    println!("{}", "Tandem Configuration".bold().underline());
    println!();

    println!("{}", "Retry:".cyan().bold());
    println!("  Max attempts:  {}", config.retry.max_attempts);
    println!("  Initial delay: {} ms", config.retry.initial_delay_ms);
    println!("  Multiplier:    {}", config.retry.backoff_multiplier);
    println!("  Max delay:     {} ms", config.retry.max_delay_ms);
    println!("  Timeout:       {} ms", config.retry.timeout_ms);
    println!();

    println!("{}", "Outbox:".cyan().bold());
    println!("  Max retries:   {}", config.outbox.max_retries);
    println!(
        "  State file:    {}",
        config.state_file(&home).display().to_string().dimmed()
    );
    println!();

    println!("  Log level:     {}", config.log_level);
    Ok(())
}

/// Write a default config file
pub async fn init(force: bool) -> Result<()> {
    let path = ConfigManager::config_path()?;
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    let path = ConfigManager::save(&TandemConfig::default())?;
    println!(
        "{} Wrote default config to {}",
        "✓".green(),
        path.display().to_string().cyan()
    );
    Ok(())
}

/// Print the config file location
pub async fn path() -> Result<()> {
    println!("{}", ConfigManager::config_path()?.display());
    Ok(())
}
