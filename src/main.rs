use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use waav_conversation::{
    ConversationConfig, ConversationEvent, LoopbackConnector, SessionController, SessionOptions,
    config::{ConnectionType, ServerLocation},
};

/// WaaV Conversation - drive a conversational agent session from the terminal
#[derive(Parser, Debug)]
#[command(name = "waav-conversation")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Agent to talk to (overrides configuration)
    #[arg(long = "agent-id")]
    agent_id: Option<String>,

    /// Pre-signed conversation URL (overrides configuration)
    #[arg(long = "signed-url")]
    signed_url: Option<String>,

    /// Server location: us, eu-residency, in-residency or global
    #[arg(long = "location")]
    location: Option<ServerLocation>,

    /// Connection type: websocket or webrtc
    #[arg(long = "connection")]
    connection: Option<ConnectionType>,

    /// Open a text-only session
    #[arg(long = "text-only")]
    text_only: bool,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the connection URL a session would use
    Resolve,

    /// Run a conversation against the local loopback agent
    Chat {
        /// Messages to send, in order
        #[arg(short = 'm', long = "message")]
        messages: Vec<String>,

        /// Print the final conversation state as JSON
        #[arg(long = "json")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        ConversationConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ConversationConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let options = SessionOptions {
        agent_id: cli.agent_id.clone(),
        signed_url: cli.signed_url.clone(),
        server_location: cli.location,
        connection_type: cli.connection,
        text_only: cli.text_only.then_some(true),
        ..Default::default()
    };

    match cli.command.unwrap_or(Commands::Chat {
        messages: Vec::new(),
        json: false,
    }) {
        Commands::Resolve => {
            let resolved = config.resolve(&options)?;
            println!("{}", resolved.url);
        }
        Commands::Chat { messages, json } => chat(config, options, messages, json).await?,
    }

    Ok(())
}

async fn chat(
    config: ConversationConfig,
    options: SessionOptions,
    messages: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    let controller = SessionController::new(Arc::new(LoopbackConnector::new()), config);

    let mut events = controller.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConversationEvent::Message { source, text } => println!("{source}: {text}"),
                ConversationEvent::Error { kind, message } => {
                    warn!(?kind, "Conversation error: {}", message)
                }
                ConversationEvent::Disconnected { reason } => {
                    info!(?reason, "Conversation ended");
                    break;
                }
                other => tracing::debug!(?other, "Conversation event"),
            }
        }
    });

    let session_id = controller.begin(options).await?;
    info!(%session_id, "Conversation started");

    for message in &messages {
        controller.send_user_message(message)?;
    }

    controller.dispose().await;
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&controller.snapshot())?);
    }

    Ok(())
}
