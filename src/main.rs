use clap::Parser;
use dotenvy::dotenv;
use fileset_engine::config::StorageConfig;
use fileset_engine::infrastructure::{database, storage};
use fileset_engine::services::file_processor::FileStore;
use fileset_engine::services::worker::BackgroundWorker;
use fileset_engine::{AppState, create_app};
use std::net::{IpAddr, SocketAddr};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the API server to
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fileset_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting File Set Engine...");

    // 2. Setup Infrastructure
    let config = StorageConfig::from_env();
    info!(
        "🛡️  Storage Config: Runtime={:?}, Max Size={}MB, Thumbnail={}px@{}",
        config.runtime,
        config.max_upload_size / 1024 / 1024,
        config.thumbnail_width,
        config.thumbnail_quality
    );

    let db = database::setup_database().await?;
    let roots = storage::setup_storage(&config).await?;
    let file_store = FileStore::from_config(roots.clone(), &config);

    // 3. Setup Graceful Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // 4. Start Temp Sweeper
    let worker = BackgroundWorker::new(roots, &config, shutdown_rx);
    let worker_handle = tokio::spawn(worker.run());
    info!("👷 Temp sweeper initialized.");

    // 5. API Server
    let state = AppState {
        db,
        file_store,
        config,
    };

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://{}", addr);
    info!("📖 Swagger UI documentation: http://{}/swagger-ui", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    info!("🛑 Shutting down backend services...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        error!("Temp sweeper ended abnormally: {}", e);
    }

    info!("👋 File Set Engine exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
