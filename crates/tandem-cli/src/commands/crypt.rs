//! Encrypt/decrypt commands - Work with single envelopes

use super::secret::parse_secret;
use anyhow::{Context, Result};
use colored::Colorize;
use tandem_core::{CipherService, EncryptedEnvelope, MessageContent, SecurityLevel};

fn cipher() -> CipherService {
    let cipher = CipherService::probe();
    if cipher.security_level() == SecurityLevel::ObfuscationOnly {
        eprintln!(
            "{}",
            "Warning: AES-GCM unavailable, output has no integrity protection".yellow()
        );
    }
    cipher
}

/// Encrypt a text message, or raw content JSON with `json = true`
pub async fn encrypt(secret: &str, input: &str, json: bool) -> Result<()> {
    let secret = parse_secret(secret)?;

    let content = if json {
        serde_json::from_str::<MessageContent>(input).context("Invalid message content JSON")?
    } else {
        MessageContent::text(input)
    };
    content.validate()?;

    let envelope = cipher().encrypt(&content, &secret)?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

/// Decrypt an envelope given its ciphertext and IV
pub async fn decrypt(secret: &str, ciphertext: &str, iv: &str) -> Result<()> {
    let secret = parse_secret(secret)?;
    let envelope = EncryptedEnvelope {
        ciphertext: ciphertext.to_string(),
        iv: iv.to_string(),
    };

    let content = cipher()
        .decrypt(&envelope, &secret)
        .context("Could not decrypt envelope (wrong secret or corrupted data)")?;

    eprintln!(
        "{} {} {}",
        "✓".green(),
        content.message_type().to_string().cyan(),
        content.preview().dimmed()
    );
    println!("{}", serde_json::to_string_pretty(&content)?);
    Ok(())
}
