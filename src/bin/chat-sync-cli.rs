//! chat-sync CLI
//!
//! Non-interactive client for trying the engine against a server: opens the
//! local database, runs background sync, optionally sends one message and
//! prints what the UI would show.

use anyhow::Result;
use chat_sync_core::chat::conversation::{SyncListener, SyncReport, SyncTrigger};
use chat_sync_core::{ChatEngine, EngineConfig};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "chat-sync-cli")]
#[command(about = "Local-first chat sync client for testing", long_about = None)]
struct Args {
    #[arg(long, default_value = "http://localhost:10002")]
    api_base_url: String,

    #[arg(long, default_value = "sqlite://chat_sync.db?mode=rwc")]
    db_url: String,

    #[arg(short, long)]
    user_id: String,

    #[arg(short, long, default_value = "")]
    token: String,

    /// Sent once after start-up.
    #[arg(short, long)]
    message: Option<String>,

    /// Conversation to send into; a new chat when omitted.
    #[arg(short, long)]
    conversation: Option<String>,

    /// Seconds to keep syncing, 0 runs until Ctrl-C.
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// Used when RUST_LOG is not set.
    #[arg(long, default_value = "info,chat_sync_core=debug")]
    log_level: String,
}

fn init_logger(log_level: &str) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .init();
}

struct CliSyncListener;

#[async_trait::async_trait]
impl SyncListener for CliSyncListener {
    async fn on_sync_start(&self, trigger: SyncTrigger) {
        info!("[CLI/Sync] sync started ({})", trigger);
    }

    async fn on_sync_finish(&self, report: &SyncReport) {
        info!(
            "[CLI/Sync] sync finished: synced={:?} skipped={:?} failed={:?}",
            report.synced, report.skipped, report.failed
        );
    }

    async fn on_conversation_synced(&self, conversation_id: &str) {
        info!("[CLI/Sync] synced {}", conversation_id);
    }

    async fn on_conversation_sync_failed(&self, conversation_id: &str, error: &str) {
        warn!("[CLI/Sync] {} failed: {}", conversation_id, error);
    }
}

fn print_state(engine: &ChatEngine) {
    let list = engine.conversation_list();
    info!("[CLI] conversations ({}):", list.len());
    for item in &list {
        info!(
            "[CLI]   {}{} | {} | {} messages | {}",
            if item.is_starred { "* " } else { "" },
            item.id,
            item.title,
            item.message_count,
            item.last_message_preview.as_deref().unwrap_or("")
        );
    }
    for message in engine.active_messages() {
        info!(
            "[CLI]   [{:?}/{:?}] {}",
            message.role, message.status, message.content
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    let mut config = EngineConfig::new(args.user_id.clone(), args.token.clone());
    config.api_base_url = args.api_base_url.clone();
    config.db_url = args.db_url.clone();

    let engine = Arc::new(ChatEngine::open_with_listener(config, Arc::new(CliSyncListener)).await?);
    engine.start_sync();
    print_state(&engine);

    if let Some(content) = &args.message {
        if let Some(id) = &args.conversation {
            if !engine.select_conversation(Some(id.clone())) {
                warn!("[CLI] conversation {} is not stored locally, starting a new chat", id);
            }
        }

        let sender = engine.clone();
        let content = content.clone();
        let mut send = tokio::spawn(async move { sender.send(&content).await });
        let result = tokio::select! {
            result = &mut send => result?,
            _ = tokio::signal::ctrl_c() => {
                engine.stop_generating();
                info!("[CLI] generation stopped");
                send.await?
            }
        };
        match result {
            Ok(outcome) => info!(
                "[CLI] reply stored in {:?} (cancelled: {})",
                outcome.conversation_id, outcome.cancelled
            ),
            Err(e) => error!("[CLI] send failed: {}", e),
        }
        print_state(&engine);
    }

    if args.duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    } else {
        info!("[CLI] running, Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    engine.shutdown().await;
    print_state(&engine);
    Ok(())
}
