use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use intake_bot::channels::{Channel, CliChannel, TelegramChannel};
use intake_bot::config::{IntakeConfig, StorageConfig};
use intake_bot::dispatcher::Dispatcher;
use intake_bot::intake::{DatabaseCatalog, IntakeEngine, SessionStore, StaticCatalog};
use intake_bot::routes::{AppState, control_routes, cors_layer};
use intake_bot::storage::{BlobStore, HttpBlobStore, LocalBlobStore};
use intake_bot::store::{Database, LibSqlBackend};

/// How often idle sessions are swept when expiry is enabled.
const PRUNE_INTERVAL_SECS: u64 = 60;

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "intake-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = IntakeConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("🏫 PPDB intake bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   HTTP: http://0.0.0.0:{}", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    if let Some(path) = &config.catalog_path {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading step catalog {}", path.display()))?;
        let catalog = StaticCatalog::from_json(&json)
            .with_context(|| format!("parsing step catalog {}", path.display()))?;
        db.replace_steps(catalog.definitions()).await?;
        eprintln!(
            "   Catalog: {} steps loaded from {}",
            catalog.definitions().len(),
            path.display()
        );
    }

    // ── Blob storage ─────────────────────────────────────────────────────
    let (blobs, files_dir): (Arc<dyn BlobStore>, Option<&Path>) = match &config.storage {
        StorageConfig::Local { dir, public_base } => {
            eprintln!("   Uploads: {} ({})", dir.display(), public_base);
            (
                Arc::new(LocalBlobStore::new(dir.clone(), public_base.clone())),
                Some(dir.as_path()),
            )
        }
        StorageConfig::Http {
            url,
            service_key,
            bucket,
        } => {
            eprintln!("   Uploads: {url} (bucket {bucket})");
            (
                Arc::new(HttpBlobStore::new(url, bucket, service_key.clone())),
                None,
            )
        }
    };

    // ── Channel ──────────────────────────────────────────────────────────
    let channel: Arc<dyn Channel> = match &config.telegram {
        Some(tg) => {
            eprintln!(
                "   Telegram: enabled (allowed: {})",
                if tg.allowed_users.iter().any(|u| u == "*") {
                    "everyone".to_string()
                } else {
                    tg.allowed_users.join(", ")
                }
            );
            Arc::new(TelegramChannel::new(
                tg.bot_token.clone(),
                tg.allowed_users.clone(),
            ))
        }
        None => {
            eprintln!("   Channel: cli (type DAFTAR to begin, /image <path> to upload)\n");
            Arc::new(CliChannel::new())
        }
    };

    // ── Engine ───────────────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new());
    let engine = Arc::new(IntakeEngine::new(
        Arc::new(DatabaseCatalog::new(Arc::clone(&db))),
        Arc::clone(&db),
        blobs,
        Arc::clone(&channel),
        Arc::clone(&sessions),
    ));

    if let Some(max_idle) = config.session_idle {
        eprintln!("   Session expiry: {}s idle", max_idle.as_secs());
        let sessions = Arc::clone(&sessions);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(PRUNE_INTERVAL_SECS));
            loop {
                interval.tick().await;
                let pruned = sessions.prune_stale(max_idle).await;
                if pruned > 0 {
                    tracing::info!(pruned, "Expired idle sessions");
                }
            }
        });
    }

    // ── HTTP control surface ─────────────────────────────────────────────
    let app = control_routes(
        AppState {
            db: Arc::clone(&db),
            channel: Arc::clone(&channel),
        },
        cors_layer(config.cors_origin.as_deref())?,
        files_dir,
    );
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("binding HTTP port {}", config.http_port))?;
    tokio::spawn(async move {
        tracing::info!("HTTP control server started");
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "HTTP server stopped");
        }
    });

    // ── Message loop ─────────────────────────────────────────────────────
    let dispatcher = Dispatcher::new(engine, Arc::clone(&channel));
    let stream = channel.start().await?;
    tracing::info!(channel = channel.name(), "Listening for messages");

    tokio::select! {
        _ = dispatcher.run(stream) => {
            tracing::info!("Channel stream closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
