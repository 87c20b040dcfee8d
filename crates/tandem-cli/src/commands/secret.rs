//! Secret command - Generate and check couple secrets

use anyhow::{Context, Result};
use colored::Colorize;
use tandem_core::crypto::{
    generate_secret_with_source, hash_secret, verify_secret, CoupleSecret, SecretSource,
};

pub fn parse_secret(value: &str) -> Result<CoupleSecret> {
    CoupleSecret::from_hex(value).context("Couple secret must be 64 hex characters")
}

/// Generate a new couple secret and its verification hash
pub async fn generate() -> Result<()> {
    let (secret, source) = generate_secret_with_source();

    println!("{}", "New couple secret".bold());
    println!("  Secret: {}", secret.as_hex().cyan());
    println!("  Hash:   {}", hash_secret(&secret).dimmed());

    if source == SecretSource::WeakFallback {
        println!(
            "{}",
            "  Warning: OS random source unavailable, secret was generated with a weak fallback."
                .yellow()
        );
    }

    println!();
    println!(
        "{}",
        "Share the secret with your partner only. The hash is safe to store remotely.".dimmed()
    );
    Ok(())
}

/// Print the verification hash of a secret
pub async fn hash(secret: &str) -> Result<()> {
    let secret = parse_secret(secret)?;
    println!("{}", hash_secret(&secret));
    Ok(())
}

/// Check a secret against a stored hash
pub async fn verify(secret: &str, hash: &str) -> Result<()> {
    let secret = parse_secret(secret)?;

    if verify_secret(&secret, hash) {
        println!("{} Secret matches", "✓".green());
        Ok(())
    } else {
        anyhow::bail!("Secret does not match the stored hash")
    }
}
