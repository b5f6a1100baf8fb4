//! rtchat-cli - Lightweight customer-chat client
//!
//! A terminal client for Webex Connect style in-app chat backends.

mod api;
mod auth;
mod calling;
mod config;
mod engine;
mod models;
mod push;
mod session;
mod tui;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;

#[derive(Parser)]
#[command(name = "rtchat-cli")]
#[command(about = "Lightweight CLI client for Webex Connect customer chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store app credentials and register this install as a guest user
    Register {
        /// Chat application id
        #[arg(long)]
        app_id: String,

        /// Client secret (secretkey header)
        #[arg(long)]
        client_key: String,

        /// Pre-issued access token (skips guest registration)
        #[arg(long)]
        access_token: Option<String>,

        /// Site URL the API and push hosts are derived from
        #[arg(long)]
        site_url: Option<String>,

        /// Explicit API base URL (overrides derivation)
        #[arg(long)]
        base_url: Option<String>,

        /// Explicit push host (overrides derivation)
        #[arg(long)]
        push_host: Option<String>,

        /// Preferred language, e.g. "cs"
        #[arg(long)]
        locale: Option<String>,

        /// Message sent automatically when a new visitor opens the chat
        #[arg(long)]
        start_message: Option<String>,

        /// Send the start message invisibly
        #[arg(long)]
        start_message_hidden: bool,

        /// Auto-start policy: only-when-empty (default) or always
        #[arg(long)]
        auto_start_policy: Option<String>,
    },

    /// Show current configuration and authentication status
    Status,

    /// Clear the stored session (keeps the stable user identity)
    Logout,

    /// List conversation threads
    Threads,

    /// Create a new conversation thread
    New,

    /// Print a thread's reconciled transcript
    Read {
        /// Thread ID (from `threads` output)
        thread_id: String,

        /// Save the transcript to a file instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send a message or a file attachment
    Send {
        /// Thread ID (from `threads` output)
        #[arg(short, long)]
        to: String,

        /// Message text
        message: Option<String>,

        /// File to upload and send as an attachment
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Connect to the push channel and print incoming events
    Listen,

    /// Launch the interactive chat interface
    Tui,
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
        Commands::Register {
            app_id,
            client_key,
            access_token,
            site_url,
            base_url,
            push_host,
            locale,
            start_message,
            start_message_hidden,
            auto_start_policy,
        } => {
            register(
                app_id,
                client_key,
                access_token,
                site_url,
                base_url,
                push_host,
                locale,
                start_message,
                start_message_hidden,
                auto_start_policy,
            )
            .await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Logout => {
            auth::logout().await?;
        }
        Commands::Threads => {
            tracing::info!("Fetching threads...");
            api::list_threads().await?;
        }
        Commands::New => {
            api::new_thread().await?;
        }
        Commands::Read { thread_id, output } => {
            api::read_messages(&thread_id, output.as_deref()).await?;
        }
        Commands::Send { to, message, file } => match (message, file) {
            (_, Some(path)) => {
                tracing::info!("Uploading attachment...");
                api::send_file(&to, &path).await?;
            }
            (Some(text), None) => {
                tracing::info!("Sending message...");
                api::send_text(&to, &text).await?;
            }
            (None, None) => {
                anyhow::bail!("Nothing to send: pass a message or --file");
            }
        },
        Commands::Listen => {
            listen().await?;
        }
        Commands::Tui => {
            tui::run().await?;
        }
    }

    Ok(())
}

/// Persist app configuration and obtain the first access token.
#[allow(clippy::too_many_arguments)]
async fn register(
    app_id: String,
    client_key: String,
    access_token: Option<String>,
    site_url: Option<String>,
    base_url: Option<String>,
    push_host: Option<String>,
    locale: Option<String>,
    start_message: Option<String>,
    start_message_hidden: bool,
    auto_start_policy: Option<String>,
) -> Result<()> {
    if let Some(ref policy) = auto_start_policy {
        if engine::AutoStartPolicy::parse(policy).is_none() {
            anyhow::bail!("Unknown auto-start policy '{policy}' (use only-when-empty or always)");
        }
    }

    let mut config = Config::load()?;
    config.app_id = Some(app_id);
    config.client_key = Some(client_key);
    config.site_url = site_url;
    config.base_url = base_url;
    config.push_host = push_host;
    config.locale = locale;
    config.start_message = start_message;
    config.start_message_hidden = start_message_hidden;
    config.auto_start_policy = auto_start_policy;
    config.access_token = None;
    if let Some(token) = access_token {
        // Pre-issued token: trusted as-is, replaced via the lazy 401 path
        // if the backend rejects it.
        config.set_access_token(token);
    }
    config.save()?;

    // Validate the configuration by building a client (registers as a
    // guest unless a token was supplied).
    let client = api::client::ConnectClient::new(Config::load()?).await?;
    println!(
        "Ready. User {} on app {}.",
        client.user_id(),
        client.app_id()
    );
    Ok(())
}

/// Stream push events to stdout until Ctrl-C.
async fn listen() -> Result<()> {
    let config = Config::load()?;
    let push_host = config.push_host_name()?;
    let client = api::client::ConnectClient::new(config).await?;

    let token = client.access_token()?.token;
    let creds = push::PushCredentials::derive(
        &push_host,
        client.app_id(),
        client.user_id(),
        client.device_id(),
        &token,
        client.client_key(),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<models::RawEvent>(64);
    let connection = tokio::spawn(push::connect_and_run(creds, tx));

    println!("Push channel connecting. Listening for events... (Ctrl-C to stop)");
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(raw) => print_event(&raw),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }
    drop(rx);
    let _ = connection.await;
    Ok(())
}

fn print_event(raw: &models::RawEvent) {
    use engine::normalize::{normalize, Normalized};
    match normalize(raw) {
        Some(Normalized::Message(msg)) => {
            let who = if msg.is_outbound() { "you" } else { "agent" };
            let text = msg.text.as_deref().unwrap_or("[media]");
            println!("[MSG] {}: {}", who, text);
        }
        Some(Normalized::System(event)) => {
            println!("[SYS] {:?}", event);
        }
        None => {
            println!("[???] undisplayable event");
        }
    }
}
