use clap::Parser;
use dotenvy::dotenv;
use remote_folder::config::{FolderConfig, FolderMode};
use remote_folder::services::worker::StagingJanitor;
use remote_folder::{AppState, create_app, with_request_tracing};
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Folder mode (local, delegate); overrides FOLDER_MODE
    #[arg(short, long)]
    mode: Option<FolderMode>,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: std::net::IpAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remote_folder=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = FolderConfig::from_env();
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    info!("🚀 Starting remote folder service [Mode: {}]...", config.mode);
    info!(
        "📁 Folder Config: Root={}, Max Upload={}MB, Slugify={}, Token Timeout={}ms",
        config.folder_root.display(),
        config.max_upload_size / 1024 / 1024,
        config.slugify_names,
        config.token_timeout_ms
    );
    if let Some(endpoint) = &config.remote_endpoint {
        info!("🔗 Remote endpoint: {}", endpoint);
    }

    let state = AppState::from_config(config.clone())?;

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    if let Some(assembler) = state.assembler.clone() {
        let janitor = StagingJanitor::new(
            assembler,
            config.staging_retention,
            config.staging_sweep_interval,
            shutdown_rx,
        );
        tokio::spawn(async move {
            janitor.run().await;
        });
    }

    let app = with_request_tracing(create_app(state));

    let addr = SocketAddr::from((args.host, args.port));
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("🛑 Server shut down gracefully.");
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
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
