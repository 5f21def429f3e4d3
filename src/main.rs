use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use shopdesk_messenger::{AgentChatClient, GraphSendClient, MessageAggregator, WebhookHandler};
use shopdesk_server::{AppState, ServerConfig};
use shopdesk_settings::AppSettings;
use shopdesk_store::users::User;
use shopdesk_store::{Database, EntityRegistry, Repository};
use shopdesk_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "shopdesk", about = "Shop backend and Messenger assistant gateway")]
struct Args {
    /// Settings file. Defaults to `$SHOPDESK_CONFIG` or `~/.shopdesk/settings.json`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = shopdesk_settings::load_settings(args.config.as_deref())
        .context("failed to load settings")?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    init_telemetry(&TelemetryConfig::from_level_str(
        &settings.logging.level,
        settings.logging.json,
    ));
    tracing::info!(env = ?settings.env, "Starting Shopdesk");

    let db = open_database(&settings.database.path)?;
    let registry = Arc::new(EntityRegistry::standard());

    if settings.env.seeds_database() {
        let users: Repository<User> = Repository::new(db.clone(), Arc::clone(&registry));
        if let Some(admin) = shopdesk_store::seed::seed_admin(&users).context("failed to seed admin user")? {
            tracing::info!(user_id = %admin.id, "Seeded admin user");
        }
    }

    let aggregator = build_aggregator(&settings)?;
    let state = AppState::new(
        db,
        registry,
        WebhookHandler::new(aggregator.clone()),
        &settings.messenger.verify_token,
    );

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        api_prefix: settings.server.api_prefix.clone(),
        request_timeout_secs: settings.server.request_timeout_secs,
    };
    let handle = shopdesk_server::start(config, state)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "Shopdesk server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    aggregator.shutdown();
    Ok(())
}

fn open_database(path: &str) -> Result<Database> {
    let db = if path == ":memory:" {
        Database::in_memory()
    } else {
        Database::open(Path::new(path))
    }
    .with_context(|| format!("failed to open database at {path}"))?;
    tracing::info!(path, "Database opened");
    Ok(db)
}

fn build_aggregator(settings: &AppSettings) -> Result<MessageAggregator> {
    let messenger = &settings.messenger;
    if messenger.verify_token.is_empty() || messenger.page_access_token.is_empty() {
        tracing::warn!("messenger tokens are not configured");
    }

    let sender = GraphSendClient::new(
        &messenger.graph_url,
        &messenger.graph_api_version,
        SecretString::from(messenger.page_access_token.clone()),
    )
    .context("failed to build Send API client")?;
    let responder = AgentChatClient::new(
        &messenger.agent_url,
        messenger.store_id.clone(),
        Duration::from_millis(messenger.agent_timeout_ms),
    )
    .context("failed to build agent chat client")?;

    Ok(MessageAggregator::new(
        Arc::new(sender),
        Arc::new(responder),
        Duration::from_millis(messenger.debounce_ms),
    ))
}
