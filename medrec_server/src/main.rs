use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use medrec_core::{Config, Database, PasswordHasher, PatientStore, TokenSigner, UserStore};
use medrec_server::{router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "medrec")]
#[command(about = "Healthcare records API server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Listen address, e.g. 127.0.0.1:8000
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print collection counts and registered users
    Inspect,

    /// Give legacy patients without a logical id one, then index it
    BackfillIds,
}

#[tokio::main]
async fn main() -> Result<()> {
    medrec_core::logging::init();

    let cli = Cli::parse();
    let config = Config::load_with_path(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Serve { bind }) => cmd_serve(config, bind).await,
        Some(Commands::Inspect) => cmd_inspect(config).await,
        Some(Commands::BackfillIds) => cmd_backfill_ids(config).await,
        None => {
            // Default to "serve" command
            cmd_serve(config, None).await
        }
    }
}

async fn cmd_serve(config: Config, bind: Option<String>) -> Result<()> {
    // Refuse to start without a signing secret, before touching the store
    let secret = config.require_secret()?;
    let signer = TokenSigner::new(secret, Duration::minutes(config.auth.token_ttl_minutes))?;
    let hasher = PasswordHasher::new(config.auth.bcrypt_cost)?;

    tracing::info!("Starting up the application...");
    let db = Database::connect(&config.database)
        .await
        .context("Failed to initialize the database")?;
    db.provision_indexes().await?;

    let state = Arc::new(AppState::new(db.clone(), signer, hasher, &config.records));
    let app = router(state);

    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    tracing::info!("Shutting down the application...");
    db.close().await;
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn cmd_inspect(config: Config) -> Result<()> {
    let db = Database::connect(&config.database).await?;
    let users = UserStore::new(&db, PasswordHasher::default());

    let stats = db.collection_stats().await?;
    println!("Collections:");
    println!("  users: {}", stats.users);
    println!("  patients: {}", stats.patients);
    println!(
        "  patients missing logical id: {}",
        stats.patients_missing_logical_id
    );

    let summaries = users.list_summaries().await?;
    println!("\nUsers ({}):", summaries.len());
    for user in summaries {
        println!(
            "  {} <{}> created {} {}",
            user.username,
            user.email,
            user.created_at.to_rfc3339(),
            if user.is_active { "active" } else { "inactive" }
        );
    }

    db.close().await;
    Ok(())
}

async fn cmd_backfill_ids(config: Config) -> Result<()> {
    let db = Database::connect(&config.database).await?;
    let patients = PatientStore::new(&db, config.records.max_page_limit);

    let fixed = patients.backfill_logical_ids().await?;
    println!("Fixed {} patients with null IDs", fixed);

    let report = db.provision_indexes().await?;
    if report.logical_id_indexed {
        println!("Patient ID index is in place");
    }

    db.close().await;
    Ok(())
}
