//! TDP Server - Main entry point

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::{net::SocketAddr, time::Duration};
use tdp_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use tdp_server::{config::Config, db, features, ingest, middleware};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    db: sqlx::PgPool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let mut log_config = LogConfig::new();
    log_config.log_file_prefix = "tdp-server".to_string();
    log_config.filter_directives =
        Some("tdp_server=debug,tower_http=debug,sqlx=info".to_string());

    // Environment variables take precedence
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    info!("Starting TDP Server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Initialize database connection pool
    let db_config = db::DbConfig::from_env()?;
    let db_pool = db::create_pool(&db_config).await?;

    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    // Surface broken vendor configurations in the logs before the first cycle
    ingest::validate_configurations(&db_pool).await?;

    // Start the ingestion scheduler if enabled
    let settings = ingest::IngestSettings::from_env()?;
    let scheduler_handle = if settings.enabled {
        info!("Ingestion is enabled, starting cycle scheduler");
        let scheduler = ingest::CycleScheduler::new(settings.clone(), db_pool.clone());
        Some(scheduler.start()?)
    } else {
        info!("Ingestion is disabled (INGEST_ENABLED=false)");
        None
    };

    // Start the job queue worker if enabled
    let _job_handle = if settings.queue_enabled {
        info!("Job queue is enabled, starting worker");
        Some(
            ingest::JobScheduler::new(settings.clone(), db_pool.clone())
                .start()
                .await?,
        )
    } else {
        None
    };

    // Create application state
    let state = AppState { db: db_pool };

    // Build the application router
    let app = create_router(state, &config);

    // Create socket address
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
        .await?;

    // Stop the scheduler after the HTTP server has drained
    if let Some((handle, shutdown_tx)) = scheduler_handle {
        let _ = shutdown_tx.send(true);
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            tracing::warn!("Ingestion scheduler did not stop in time");
        }
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(state: AppState, config: &Config) -> Router {
    // Create feature state
    let feature_state = features::FeatureState {
        db: state.db.clone(),
    };

    let feature_routes = features::router(feature_state);

    // Build the main router with middleware stack
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .with_state(state.clone())
        .nest("/api/v1", feature_routes)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Result<Response, StatusCode> {
    // Check database connectivity
    match db::health_check(&state.db).await {
        Ok(_) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Get platform statistics
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let transactions =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pos_transactions").fetch_one(&state.db);

    let configurations =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM vendor_configurations WHERE is_active")
            .fetch_one(&state.db);

    let runs =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pos_ingestion_log").fetch_one(&state.db);

    // Execute all queries concurrently
    let (transactions, configurations, runs) = tokio::join!(transactions, configurations, runs);

    match (transactions, configurations, runs) {
        (Ok(transactions), Ok(configurations), Ok(runs)) => (
            StatusCode::OK,
            Json(json!({
                "transactions": transactions,
                "active_configurations": configurations,
                "ingestion_runs": runs
            })),
        )
            .into_response(),
        _ => {
            tracing::error!("Failed to fetch stats from database");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch statistics" })),
            )
                .into_response()
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give ongoing requests time to complete
    info!(
        "Waiting up to {} seconds for connections to close",
        timeout_secs
    );
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
