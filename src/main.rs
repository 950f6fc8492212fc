use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use hallbook::config::Config;
use hallbook::ledger::Ledger;
use hallbook::locks::IntervalLockManager;
use hallbook::resolver::BookingResolver;
use hallbook::{compactor, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    hallbook::observability::init(config.metrics_port)?;

    let ledger = match config.wal_path() {
        Some(wal_path) => {
            if let Some(dir) = wal_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let ledger = Arc::new(Ledger::open(wal_path)?);
            let compactor_ledger = ledger.clone();
            let threshold = config.compact_threshold;
            tokio::spawn(async move {
                compactor::run_compactor(compactor_ledger, threshold, Duration::from_secs(5)).await;
            });
            ledger
        }
        None => Arc::new(Ledger::in_memory()),
    };

    let resolver = Arc::new(BookingResolver::new(
        Arc::new(config.halls.clone()),
        Arc::new(IntervalLockManager::new()),
        ledger.clone(),
        config.lock_policy,
    ));

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("hallbook listening on {addr}");
    info!(
        "  ledger: {}",
        config
            .wal_path()
            .map_or("in-memory".to_string(), |p| p.display().to_string())
    );
    info!("  bookings loaded: {}", ledger.booking_count());
    info!("  halls: {}", config.halls.all_resource_ids().join(", "));
    info!(
        "  lock timeout: {:?} x {} attempts",
        config.lock_policy.timeout, config.lock_policy.attempts
    );
    info!("  max_connections: {max_connections}");

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("no SIGTERM handler ({e}), waiting for ctrl-c only");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(hallbook::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                tracing::debug!("connection from {peer}");
                metrics::counter!(hallbook::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(hallbook::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let resolver = resolver.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, resolver).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(hallbook::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("hallbook stopped");
    Ok(())
}
