//! CLI commands over the sync engine (print to stdout)

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use recruit_chat::api::{ChatApi, ChatClient, OutgoingBody};
use recruit_chat::config::Config;
use recruit_chat::models::{
    Conversation, ConversationId, Message, MessageKind, Participant, ParticipantId, Role,
};
use recruit_chat::realtime::{
    ChannelEvent, ChannelSettings, ConnectionManager, EventKind, InboundEvent,
};
use recruit_chat::sync::{ConversationScope, LogEntry, SyncEngine};

/// Scope for one-shot commands that never open the push channel.
struct Detached;

impl ConversationScope for Detached {
    fn join(&self, conversation: &ConversationId) {
        tracing::debug!("No push channel; not joining {}", conversation);
    }

    fn leave(&self, _conversation: &ConversationId) {}
}

fn engine(config: &Config, scope: Arc<dyn ConversationScope>) -> Result<SyncEngine> {
    let me = config.identity()?;
    let api: Arc<dyn ChatApi> = Arc::new(ChatClient::from_config(config)?);
    Ok(SyncEngine::new(me, api, scope, &config.sync))
}

pub fn configure(
    participant: Option<String>,
    role: Option<Role>,
    api_url: Option<String>,
    socket_url: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(participant) = participant {
        config.participant_id = Some(participant);
    }
    if let Some(role) = role {
        config.role = role;
    }
    if let Some(url) = api_url {
        config.api_base_url = url;
    }
    if let Some(url) = socket_url {
        config.socket_url = url;
    }
    if let Some(token) = token {
        config.api_token = Some(token);
    }
    config.save()?;

    println!("Saved {}", Config::config_path()?.display());
    Ok(())
}

pub async fn status() -> Result<()> {
    let config = Config::load()?;

    println!("Config:  {}", Config::config_path()?.display());
    match config.identity() {
        Ok(me) => println!("Identity: {} ({})", me.id, me.role.as_str()),
        Err(_) => println!("Identity: (not configured)"),
    }
    println!("REST:    {}", config.api_base_url);
    println!("Channel: {}", config.socket_url);
    println!(
        "Token:   {}",
        if config.api_token.is_some() { "set" } else { "not set" }
    );

    let client = ChatClient::from_config(&config)?;
    match client.list_conversations().await {
        Ok(list) => println!("\nREST API reachable ({} conversations)", list.len()),
        Err(e) => println!("\nREST API check failed: {}", e),
    }
    Ok(())
}

pub async fn conversations() -> Result<()> {
    let config = Config::load()?;
    let engine = engine(&config, Arc::new(Detached))?;
    let list = engine.refresh_conversations().await?;

    println!("\nConversations:");
    println!("{:-<60}", "");

    if list.is_empty() {
        println!("  (no conversations found)");
        return Ok(());
    }

    for conversation in &list {
        print_conversation(conversation, &engine.identity().id);
    }
    Ok(())
}

fn print_conversation(conversation: &Conversation, me: &ParticipantId) {
    let with = conversation
        .counterpart(me)
        .map(|p| format!("{} ({})", p.id, p.role.as_str()))
        .unwrap_or_else(|| "?".to_string());

    if conversation.unread_count > 0 {
        println!("{}  [{} unread]", with, conversation.unread_count);
    } else {
        println!("{}", with);
    }
    println!("  ID: {}", conversation.id);
    println!("  Context: {}", conversation.context_id);
    if let Some(ref last) = conversation.last_message {
        println!("  Last: {}", last.created_at.format("%Y-%m-%d %H:%M"));
        println!("  [{}]: {}", last.sender_id, preview(last));
    }
    println!();
}

fn preview(message: &Message) -> String {
    match message.kind {
        MessageKind::Text => message.content.trim().to_string(),
        kind => format!("<{}> {}", kind.as_str(), message.content),
    }
}

fn print_entry(entry: &LogEntry) {
    match entry {
        LogEntry::Durable(m) => println!(
            "[{}] {}: {} ({})",
            m.created_at.format("%Y-%m-%d %H:%M"),
            m.sender_id,
            preview(m),
            m.state
        ),
        LogEntry::Provisional(m) => {
            println!("[pending] {}: {} ({})", m.sender_id, m.content, m.temp_id)
        }
    }
}

pub async fn read(conversation_id: &str, mark_read: bool) -> Result<()> {
    let config = Config::load()?;
    let engine = engine(&config, Arc::new(Detached))?;
    let conversation = ConversationId::new(conversation_id);

    let partition = engine.open_conversation(&conversation).await?;
    let entries = engine.messages(&conversation);
    if entries.is_empty() {
        println!("(no messages)");
    }
    for entry in &entries {
        print_entry(entry);
    }

    if mark_read {
        let marked = engine.mark_read(&conversation).await;
        println!("\nMarked {} messages read.", marked.len());
    } else if !partition.unread.is_empty() {
        println!("\n{} unread.", partition.unread.len());
    }

    engine.close_conversation(&conversation);
    Ok(())
}

async fn deliver(to: &str, body: OutgoingBody) -> Result<Message> {
    let config = Config::load()?;
    let engine = engine(&config, Arc::new(Detached))?;
    let pending = engine.send(&ConversationId::new(to), body)?;
    let stored = pending.outcome().await.context("Failed to send message")?;
    Ok(stored)
}

pub async fn send_text(to: &str, text: String) -> Result<()> {
    if text.trim().is_empty() {
        bail!("Refusing to send an empty message");
    }
    let stored = deliver(to, OutgoingBody::Text(text)).await?;
    println!("Message sent ({}).", stored.id);
    Ok(())
}

pub async fn send_file(to: &str, path: &Path, kind: MessageKind) -> Result<()> {
    if !kind.is_binary() {
        bail!("--kind must be image or file when sending a file");
    }
    let body = OutgoingBody::attachment(path, kind)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let stored = deliver(to, body).await?;
    println!("Uploaded as {} ({}).", stored.content, stored.id);
    Ok(())
}

fn print_event(event: &ChannelEvent, me: &Participant) {
    match event {
        ChannelEvent::Connected { reconnected: true } => println!("* reconnected"),
        ChannelEvent::Connected { .. } => println!("* connected as {}", me.id),
        ChannelEvent::Disconnected { reason } => println!("* disconnected: {}", reason),
        ChannelEvent::ConnectFailed { reason } => println!("* connect failed: {}", reason),
        ChannelEvent::Inbound(InboundEvent::OnlineSnapshot(ids)) => {
            println!("* {} participants online", ids.len())
        }
        ChannelEvent::Inbound(InboundEvent::ParticipantOnline(id)) => println!("* {} online", id),
        ChannelEvent::Inbound(InboundEvent::ParticipantOffline(id)) => {
            println!("* {} offline", id)
        }
        ChannelEvent::Inbound(InboundEvent::MessageCreated(m)) => {
            if !m.is_from(&me.id) {
                println!("[{}] {}: {}", m.conversation_id, m.sender_id, preview(m));
            }
        }
        ChannelEvent::Inbound(InboundEvent::MessageRead { message_id, .. }) => {
            println!("* {} read", message_id)
        }
        ChannelEvent::Inbound(InboundEvent::ConversationCreated(c)) => {
            println!("* new conversation {} ({})", c.id, c.context_id)
        }
    }
}

pub async fn listen(open: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let me = config.identity()?;

    let manager = ConnectionManager::new(ChannelSettings::from_config(&config), me.id.clone());
    let events = manager.subscribe();

    for kind in [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::ConnectFailed,
        EventKind::OnlineSnapshot,
        EventKind::ParticipantOnline,
        EventKind::ParticipantOffline,
        EventKind::MessageCreated,
        EventKind::MessageRead,
        EventKind::ConversationCreated,
    ] {
        let me = me.clone();
        manager.on(kind, move |event| print_event(event, &me));
    }
    let handle = Arc::new(manager.connect());

    let scope: Arc<dyn ConversationScope> = handle.clone();
    let engine = Arc::new(engine(&config, scope)?);
    let router = tokio::spawn(Arc::clone(&engine).run(events));

    if let Err(e) = engine.refresh_conversations().await {
        tracing::warn!("Conversation list unavailable: {}", e);
    }

    let opened = open.map(ConversationId::new);
    if let Some(ref conversation) = opened {
        let partition = engine.open_conversation(conversation).await?;
        for entry in engine.messages(conversation) {
            print_entry(&entry);
        }
        println!("-- {} unread, listening (Ctrl-C to quit) --", partition.unread.len());
    } else {
        println!("-- listening (Ctrl-C to quit) --");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    if let Some(ref conversation) = opened {
        engine.close_conversation(conversation);
    }
    handle.disconnect().await;
    router.abort();
    Ok(())
}
