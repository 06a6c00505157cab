//! on3demand daemon: drives a devfreq GPU with the on3demand governor.
//!
//! Samples GPU load for activity onsets, hosts the governor framework and
//! serves the control socket until SIGTERM/SIGINT.

use on3demand::activity::run_activity_monitor;
use on3demand::attributes::AttributeRegistry;
use on3demand::backend::FrequencyBackend;
use on3demand::config::ConfigManager;
use on3demand::error::{DaemonError, IpcError};
use on3demand::framework::FreqFramework;
use on3demand::governor::On3demand;
use on3demand::ipc_server::DaemonState;
use on3demand::logging;
use on3demand::metrics::MetricsCollector;
use on3demand::sysfs::SysfsBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Delay before the IPC listener is rebuilt after a failure
const IPC_RESTART_DELAY_SECS: u64 = 5;

/// Graceful shutdown timeout in seconds
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = logging::init_logging().map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!("on3demand daemon starting...");

    let result = run_daemon().await;

    match &result {
        Ok(()) => info!("on3demand daemon shut down gracefully"),
        Err(e) => error!("on3demand daemon error: {}", e),
    }

    result.map_err(Into::into)
}

async fn run_daemon() -> Result<(), DaemonError> {
    let config_path = ConfigManager::default_path();
    let config_manager = Arc::new(ConfigManager::load_or_default(&config_path)?);
    info!("Configuration loaded from {:?}", config_path);

    let config = config_manager.get();

    let backend: Arc<dyn FrequencyBackend> = Arc::new(SysfsBackend::open(
        &config.device.devfreq_path,
        &config.device.load_path,
    )?);

    let metrics = Arc::new(MetricsCollector::new());
    let framework = Arc::new(FreqFramework::new(Arc::new(AttributeRegistry::new())));
    let governor = On3demand::new(
        Arc::clone(&backend),
        Arc::clone(framework.attributes()),
        Arc::clone(&metrics),
    );
    framework.register_governor(Arc::new(governor.clone()))?;

    let daemon_state = Arc::new(DaemonState::new(
        Arc::clone(&framework),
        governor,
        Arc::clone(&backend),
        metrics,
        Arc::clone(&config_manager),
    ));
    daemon_state.select_governor(&config.governor, false).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(shutdown_tx).await {
            error!("Signal handler error: {}", e);
        }
    });

    let ipc_state = Arc::clone(&daemon_state);
    let ipc_shutdown_rx = shutdown_rx.clone();
    let ipc_handle = tokio::spawn(async move { run_ipc_server(ipc_state, ipc_shutdown_rx).await });

    let activity_handle = tokio::spawn(run_activity_monitor(
        Arc::clone(&framework),
        Arc::clone(&backend),
        Duration::from_millis(config.activity_poll_ms),
        shutdown_rx.clone(),
    ));

    info!("on3demand daemon initialized and running");

    let mut shutdown_rx_main = shutdown_rx.clone();
    shutdown_rx_main.changed().await.ok();

    info!("Shutdown signal received, stopping tasks...");

    let shutdown_timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let (ipc, activity) = tokio::join!(ipc_handle, activity_handle);
        for result in [ipc, activity] {
            if let Err(e) = result {
                error!("Task ended abnormally: {}", e);
            }
        }
    })
    .await;

    // Leaves the GPU wherever the governor last put it
    framework.stop().await;

    info!("All tasks stopped");
    Ok(())
}

#[cfg(unix)]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

#[cfg(not(unix))]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Serve the control socket, rebuilding the listener after failures.
async fn run_ipc_server(state: Arc<DaemonState>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("IPC server shutting down");
                    break;
                }
            }
            result = run_ipc_server_inner(Arc::clone(&state)) => {
                match result {
                    Ok(()) => break,
                    Err(e) => {
                        error!(
                            "IPC server error: {}, restarting in {} seconds",
                            e, IPC_RESTART_DELAY_SECS
                        );
                        tokio::time::sleep(Duration::from_secs(IPC_RESTART_DELAY_SECS)).await;
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
async fn run_ipc_server_inner(state: Arc<DaemonState>) -> Result<(), IpcError> {
    use on3demand::ipc_server::IpcServer;

    let server = IpcServer::new_default().await?;
    info!("IPC server listening on {:?}", server.socket_path());
    server.run(state).await
}

#[cfg(not(unix))]
async fn run_ipc_server_inner(_state: Arc<DaemonState>) -> Result<(), IpcError> {
    tracing::warn!("IPC server not available on this platform");
    std::future::pending::<()>().await;
    Ok(())
}
