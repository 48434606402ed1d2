//! Replays a scripted conversational turn against the configured backend.
//!
//! Run with: cargo run -p turn-cli-demo -- [config.toml] [session-id] [--stop]
//!
//! Configuration comes from the optional file and `AGENT_SESSION_*`
//! environment variables. Remote mode uses an in-process memory client.

use std::sync::Arc;

use agent_session_core::{MessageStore, SessionConfig, StorageMode, message::Message};
use agent_session_hooks::{BeforeToolCallEvent, HookRegistry, ToolOutcome};
use agent_session_store::{SessionManager, storage::InMemoryClient};
use anyhow::Context;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let stop = args.iter().any(|a| a == "--stop");
    let mut positional = args.iter().filter(|a| !a.starts_with("--"));
    let config_path = positional.next().map(String::as_str);
    let session_id = positional
        .next()
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let config = SessionConfig::load(config_path).context("loading session configuration")?;
    let manager = SessionManager::from_config(&config, Some(Arc::new(InMemoryClient::new())))
        .context("opening session backend")?;
    if manager.mode() == StorageMode::Remote {
        tracing::warn!("Remote mode is backed by an in-process client in this demo");
    }

    let handle = manager.open_session(&session_id, "demo-user").await?;
    let store = handle.store();

    store.append(Message::user("What is the weather in Lisbon?")).await?;

    if stop {
        manager.stop_session(&session_id).await;
    }

    let mut hooks = HookRegistry::new();
    hooks.register(Arc::new(handle.cancellation_hook()));
    let mut event = BeforeToolCallEvent::new(
        session_id.clone(),
        "weather",
        "tu-1",
        json!({"city": "Lisbon"}),
    );
    let reply = match hooks
        .invoke_tool(&mut event, || async { "sunny, 24C".to_string() })
        .await
    {
        ToolOutcome::Executed(forecast) => {
            store.append(Message::tool_result("tu-1", forecast.clone())).await?;
            Message::assistant(format!("It is {forecast} in Lisbon."))
        }
        ToolOutcome::Cancelled { reason } => Message::assistant(format!("Stopped: {reason}")),
    };
    let reply_id = store.peek_next_id()?;
    tracing::info!(%reply_id, "Announced assistant message");
    store.append(reply).await?;
    store.flush().await?;

    let messages = store.list_messages().await?;
    println!("session {session_id}: {} message(s) persisted", messages.len());
    for message in &messages {
        println!(
            "  {} {:?}: {}",
            message.id.as_deref().unwrap_or("-"),
            message.role,
            message.text()
        );
    }
    Ok(())
}
