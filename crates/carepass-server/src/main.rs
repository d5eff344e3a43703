use std::sync::Arc;

use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use carepass_api::at_rest::encrypt_plaintext_records;
use carepass_api::auth::AppStateInner;
use carepass_api::config::Config;
use carepass_api::delivery::{BaleBot, CodeDelivery, DisabledDelivery};
use carepass_api::session::run_session_sweep_loop;
use carepass_crypto::FieldCipher;

const SESSION_SWEEP_INTERVAL_SECS: u64 = 60;

/// Carepass - two-factor login in front of the encrypted hospital dashboard
#[derive(Parser)]
#[command(name = "carepass", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (the default)
    Serve,

    /// Encrypt, in place, every hospital field that is still plaintext
    EncryptRecords,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carepass=debug,carepass_api=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Generate a field key once, keep it with the database,");
            eprintln!("       and set CAREPASS_FIELD_KEY in your .env file.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(carepass_db::Database::open(&config.db_path)?);
    let cipher = FieldCipher::new(&config.field_key);

    if let Some(Commands::EncryptRecords) = cli.command {
        let report = tokio::task::spawn_blocking(move || encrypt_plaintext_records(&db, &cipher)).await??;
        info!(
            "Encrypted {} fields in {} of {} rows",
            report.fields_encrypted, report.rows_updated, report.rows_scanned
        );
        return Ok(());
    }

    let delivery: Arc<dyn CodeDelivery> = match &config.bale_token {
        Some(token) => Arc::new(BaleBot::new(&config.bale_api_url, token)),
        None => {
            warn!("CAREPASS_BALE_TOKEN not set, verification codes will not be delivered");
            Arc::new(DisabledDelivery)
        }
    };

    let state = AppStateInner::new(
        db,
        cipher,
        delivery,
        config.secure_cookie,
    );

    // Background sweep of stale sessions
    tokio::spawn(run_session_sweep_loop(
        state.sessions.clone(),
        SESSION_SWEEP_INTERVAL_SECS,
    ));

    let app = carepass_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr()?;
    info!("Carepass listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
