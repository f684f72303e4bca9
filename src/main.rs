//! Recruit Chat CLI - terminal client for the recruiting messaging service

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recruit_chat::models::{MessageKind, Role};

#[derive(Parser)]
#[command(name = "recruit-chat")]
#[command(about = "Real-time messaging between recruiters and candidates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store identity and endpoints in the config file
    Configure {
        /// Participant id to act as
        #[arg(short, long)]
        participant: Option<String>,

        /// recruiter or candidate
        #[arg(short, long)]
        role: Option<Role>,

        /// REST base URL
        #[arg(long)]
        api_url: Option<String>,

        /// Duplex channel URL
        #[arg(long)]
        socket_url: Option<String>,

        /// Bearer token for the REST API
        #[arg(long)]
        token: Option<String>,
    },

    /// Show configured identity and check the REST endpoint
    Status,

    /// List conversations with unread badges
    Conversations,

    /// Read messages from a conversation
    Read {
        /// Conversation ID (from `conversations` output)
        conversation_id: String,

        /// Mark every unread message read
        #[arg(long)]
        mark_read: bool,
    },

    /// Send a message
    Send {
        /// Conversation ID (from `conversations` output)
        #[arg(short, long)]
        to: String,

        /// Message text
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        message: Option<String>,

        /// Upload a file instead of sending text
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Attachment kind: image or file
        #[arg(short, long, default_value = "file", requires = "file")]
        kind: MessageKind,
    },

    /// Connect to the push channel and print events until Ctrl-C
    Listen {
        /// Conversation to keep open (synced and read-marked)
        #[arg(short, long)]
        open: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Configure {
            participant,
            role,
            api_url,
            socket_url,
            token,
        } => {
            commands::configure(participant, role, api_url, socket_url, token)?;
        }
        Commands::Status => {
            commands::status().await?;
        }
        Commands::Conversations => {
            tracing::info!("Fetching conversations...");
            commands::conversations().await?;
        }
        Commands::Read {
            conversation_id,
            mark_read,
        } => {
            commands::read(&conversation_id, mark_read).await?;
        }
        Commands::Send {
            to,
            message,
            file,
            kind,
        } => {
            tracing::info!("Sending message...");
            match file {
                Some(path) => commands::send_file(&to, &path, kind).await?,
                None => commands::send_text(&to, message.unwrap_or_default()).await?,
            }
        }
        Commands::Listen { open } => {
            commands::listen(open).await?;
        }
    }

    Ok(())
}
