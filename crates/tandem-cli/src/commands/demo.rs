//! Demo command - Two partners talking through an in-memory backend

use crate::config::ConfigManager;
use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use tandem_core::adapters::{JsonFileStore, MemoryBackend, MemoryPersistence};
use tandem_core::crypto::generate_secret;
use tandem_core::ports::OutboxPersistence;
use tandem_core::{
    CipherService, Conversation, OutboxStore, SendOutcome, TandemConfig, TransportClient,
};
use tracing::info;

const COUPLE_ID: &str = "demo-couple";

pub struct DemoOptions {
    /// Keep Alice's outbox in the configured state file
    pub persist: bool,
}

pub async fn run(options: DemoOptions) -> Result<()> {
    let config = ConfigManager::load().context("Failed to load config")?;
    let backend = MemoryBackend::new();
    let secret = generate_secret();

    let alice_persistence: Arc<dyn OutboxPersistence> = if options.persist {
        let path = config.state_file(&ConfigManager::tandem_home()?);
        println!("Alice's outbox: {}", path.display().to_string().dimmed());
        Arc::new(JsonFileStore::new(path))
    } else {
        Arc::new(MemoryPersistence::new())
    };

    let alice = open_store(&config, &backend, alice_persistence).await?;
    let bob = open_store(&config, &backend, Arc::new(MemoryPersistence::new())).await?;

    let alice_conv = Conversation::new(COUPLE_ID, "alice", secret.clone());
    let bob_conv = Conversation::new(COUPLE_ID, "bob", secret);

    println!(
        "{} {}",
        "Cipher:".bold(),
        cipher_label(&CipherService::probe())
    );
    if !alice.pending().is_empty() {
        println!(
            "  {} pending message(s) recovered from a previous run",
            alice.pending().len()
        );
    }

    bob.subscribe(&bob_conv).await?;
    info!("Bob is listening");

    step("Alice sends a text while online");
    report(alice.send_text(&alice_conv, "Good morning!").await?);

    step("Connection drops; Alice asks for help");
    backend.set_online(false);
    report(
        alice
            .send_task_request(&alice_conv, "groceries", "Pick up groceries", None)
            .await?,
    );
    println!("  Alice has {} pending message(s)", alice.pending().len());

    step("Connection returns; Alice reconciles");
    backend.set_online(true);
    let reconciled = alice.process_pending_messages(&alice_conv.secret).await?;
    println!(
        "  synced {}, still failing {}, dropped {}",
        reconciled.synced.len().to_string().green(),
        reconciled.failed.len(),
        reconciled.dropped.len()
    );

    step("Bob's view");
    for message in bob.messages() {
        let marker = if message.is_unread_for("bob") {
            "●".yellow()
        } else {
            "○".dimmed()
        };
        println!(
            "  {} {:<6} {}",
            marker,
            message.sender_id,
            message.content.preview()
        );
    }
    println!("  Unread: {}", bob.unread_count().to_string().yellow());

    step("Bob reads everything and sends a boost");
    for message in bob.messages() {
        if message.is_unread_for("bob") {
            bob.mark_message_as_read(&message.id, "bob").await?;
        }
    }
    report(
        bob.send_energy_boost(&bob_conv, 5, Some("On it!".to_string()))
            .await?,
    );
    println!("  Unread for Bob: {}", bob.unread_count());

    bob.unsubscribe();
    println!();
    println!("{} Demo finished", "✓".green());
    Ok(())
}

async fn open_store(
    config: &TandemConfig,
    backend: &MemoryBackend,
    persistence: Arc<dyn OutboxPersistence>,
) -> Result<OutboxStore> {
    let transport = TransportClient::new(
        Arc::new(backend.clone()),
        CipherService::probe(),
        config.retry.clone(),
    );
    OutboxStore::open(transport, persistence, &config.outbox)
        .await
        .context("Failed to open outbox")
}

fn cipher_label(cipher: &CipherService) -> String {
    if cipher.security_level().has_integrity() {
        cipher.engine_name().green().to_string()
    } else {
        format!("{} (no integrity protection)", cipher.engine_name())
            .yellow()
            .to_string()
    }
}

fn step(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

fn report(outcome: SendOutcome) {
    match outcome {
        SendOutcome::Synced { message_id, .. } => {
            println!("  {} delivered as {}", "✓".green(), message_id.dimmed())
        }
        SendOutcome::Queued { local_id, error } => println!(
            "  {} queued as {} ({})",
            "…".yellow(),
            local_id.dimmed(),
            error
        ),
    }
}
