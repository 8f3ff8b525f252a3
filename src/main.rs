use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smartdoc::{
    api::{self, ApiContext},
    auth::{HmacTokenAuthority, Identity, TokenAuthority},
    config::{self, Config},
    generation, logging,
    qa::{DocumentService, ServiceSettings},
    ratelimit::RateLimiter,
    store::{LocalBlobStore, SqliteStore},
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Smart Document Assistant: upload text and PDF documents, then ask questions about them.
#[derive(Parser)]
#[command(name = "smartdoc", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Mint a bearer token for an identity, signed with `TOKEN_SECRET`.
    IssueToken {
        /// Identity the token is issued to.
        #[arg(long)]
        identity: String,
        /// Token lifetime in minutes; defaults to `TOKEN_TTL_MINUTES`.
        #[arg(long)]
        ttl_minutes: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();
    let config = config::load_config().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::IssueToken {
            identity,
            ttl_minutes,
        } => {
            let ttl = ttl_minutes
                .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
                .unwrap_or(config.token_ttl);
            let token = HmacTokenAuthority::new(&config.token_secret)
                .issue(&Identity::new(identity), ttl)
                .context("failed to issue token")?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let blobs = Arc::new(LocalBlobStore::new(config.upload_dir.clone()));
    let store = SqliteStore::connect(&config.database_url, blobs)
        .await
        .context("failed to open database")?;
    store.migrate().await.context("failed to prepare schema")?;

    let generator = generation::build_generation_client(&config.generation)
        .context("failed to configure answer generation")?;
    if generator.is_none() {
        tracing::warn!("No generation provider configured; answers will be fallback text");
    }

    let store = Arc::new(store);
    let service = Arc::new(DocumentService::new(
        store.clone(),
        generator,
        ServiceSettings::from(&config),
    ));
    let context = ApiContext {
        tokens: Arc::new(HmacTokenAuthority::new(&config.token_secret)),
        limiter: Arc::new(RateLimiter::in_memory(config.rate_limits.failure_policy)),
        rate_limits: Arc::new(config.rate_limits.clone()),
        metrics: service.metrics(),
        allowed_origins: config.allowed_origins.clone(),
    };
    let app = api::create_router(service, context);

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.server_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.server_port))?;
    tracing::info!("Listening on http://0.0.0.0:{}", config.server_port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server terminated unexpectedly")?;

    store.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
