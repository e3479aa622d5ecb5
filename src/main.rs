use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::task::JoinHandle;
use tracing::{error, info};

use service_template::bootstrap::app::{App, AppError};
use service_template::bootstrap::config::Settings;
use service_template::bootstrap::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let loaded = Settings::load().context("failed to load config")?;
    let cfg = loaded.settings;
    telemetry::init(&cfg.log).context("failed to initialise logging")?;
    match &loaded.source {
        Some(path) => info!(path = %path.display(), "config_file_loaded"),
        None => info!("config file not found, using defaults and environment variables"),
    }
    info!(?cfg, "Starting service");

    let app = Arc::new(App::new(cfg).await.context("failed to create app")?);

    let runner = app.clone();
    let mut run_handle: JoinHandle<Result<(), AppError>> =
        tokio::spawn(async move { runner.run().await });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutting down server...");
        }
        res = &mut run_handle => {
            let err = match res {
                Ok(Ok(())) => anyhow::anyhow!("server stopped unexpectedly"),
                Ok(Err(e)) => anyhow::Error::new(e).context("failed to run app"),
                Err(e) => anyhow::Error::new(e).context("app task panicked"),
            };
            error!(error = ?err, "server_task_failed");
            if let Err(e) = app.shutdown().await {
                error!(error = %e, "cleanup_after_failure_failed");
            }
            return Err(err);
        }
    }

    app.shutdown().await.context("server forced to shutdown")?;
    match run_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = ?e, "API server task failed"),
        Err(e) => error!(error = ?e, "API server task panicked"),
    }

    info!("Server exiting");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "failed to install SIGTERM handler");
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
