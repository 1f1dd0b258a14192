use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::builder::ImageBuilder;
use crate::config::Config;
use crate::docker::RuntimeClient;
use crate::orchestrator::{ActivityTracker, EventJournal, Orchestrator};
use crate::proxy;
use crate::server::rest::create_router;
use crate::shared::models::AppState;

pub async fn run_server(host: &str, port: u16) -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env());

    info!("Starting Dojo orchestrator...");

    // Registry open and migration failures are fatal
    let db = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open registry at {}", config.database_url))?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("Failed to run database migrations")?;

    let runtime = Arc::new(
        RuntimeClient::connect(config.docker_socket.as_deref())
            .await
            .map_err(|e| {
                error!("Container runtime is required: {}", e);
                anyhow::anyhow!("Container runtime unavailable: {e}")
            })?,
    );

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Cannot create work dir {:?}", config.work_dir))?;

    let activity = Arc::new(ActivityTracker::new());
    let journal = EventJournal::start(db.clone());

    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        runtime.clone(),
        activity.clone(),
        journal.clone(),
        config.clone(),
    ));
    orchestrator
        .clone()
        .start()
        .await
        .context("Failed to recover registry state")?;

    let builder = Arc::new(ImageBuilder::new(
        db.clone(),
        runtime,
        journal,
        config.work_dir.clone(),
    ));

    let state = Arc::new(AppState {
        db,
        jwt_secret: config.jwt_secret.clone(),
        proxy_client: proxy::new_client(config.proxy_timeout),
        config,
        orchestrator: orchestrator.clone(),
        builder,
        activity,
    });

    info!("Building REST API routes...");
    let app = create_router(state.clone());

    let bind_addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    info!("Server started successfully!");
    info!("REST API Endpoint: http://{}/api", bind_addr);
    info!("Swagger UI: http://{}/swagger-ui/", bind_addr);
    info!(
        "Sandbox URLs: http://<subdomain>.{}/",
        state.config.base_domain
    );
    info!("Ready to accept requests...");

    let (draining_tx, draining_rx) = oneshot::channel();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(orchestrator, draining_tx))
    .into_future();

    // Drain in-flight requests after the signal, but only up to the grace
    // period; a stuck long-poll or WebSocket client must not hold the
    // process open forever
    tokio::select! {
        result = server => result?,
        _ = drain_deadline(draining_rx, state.config.shutdown_grace) => {
            warn!(
                "Shutdown grace period elapsed with requests still in flight, exiting"
            );
        }
    }

    info!("Server exited");
    Ok(())
}

/// On Ctrl-C: deny new launches, cancel watchers, then let axum drain
/// in-flight requests. Running containers stay up and are recovered on the
/// next boot.
async fn shutdown_signal(orchestrator: Arc<Orchestrator>, draining: oneshot::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install shutdown handler: {}", e);
    }
    orchestrator.begin_shutdown();
    let _ = draining.send(());
}

/// Resolves one grace period after the shutdown signal; pends forever while
/// the server is running normally.
async fn drain_deadline(draining: oneshot::Receiver<()>, grace: std::time::Duration) {
    if draining.await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}
