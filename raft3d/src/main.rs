use clap::Parser;
use tokio::signal;

use raft3d::config::RuntimeConfig;
use raft3d::server::Server;

/// Replicated 3D printer inventory
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path of the runtime config
    #[arg(long, default_value = "config.toml")]
    config: String,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::try_init().unwrap_or_default();
    let args = Args::parse();

    let config = RuntimeConfig::from_toml(&args.config)?;
    config.validate()?;
    let mut server = Server::start(&config).await?;

    shutdown_signal().await;
    server.stop();
    Ok(())
}
