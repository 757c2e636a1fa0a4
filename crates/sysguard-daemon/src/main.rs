//! sysguard daemon
//!
//! Discovers system metrics and serves them to clients over a line protocol.

mod config;
mod daemon;
mod server;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use daemon::{Daemon, DaemonSignal, Request};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// Modules and request handling share one thread; the daemon is never sent
// across threads.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path).context("Failed to load configuration")?;
            info!("Loaded configuration from: {}", path);
            config
        }
        None => Config::load_or_default(DEFAULT_CONFIG_PATH)
            .context("Failed to load configuration")?,
    };

    // Create channels for client notifications and requests
    let (signal_tx, _signal_rx) = broadcast::channel::<DaemonSignal>(16);
    let (request_tx, request_rx) = mpsc::channel::<Request>(64);

    let mut daemon = Daemon::new(signal_tx.clone());
    daemon.load_modules(&config).await?;
    info!("{} sensors registered", daemon.registry().len());

    let addr: SocketAddr = config
        .listen
        .parse()
        .context("Invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;
    info!("Listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = server::serve(listener, request_tx, signal_tx).await {
            error!("Protocol server stopped: {}", e);
        }
    });

    // Setup Unix signal handlers
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
    };

    // The first scan already ran during module init.
    let interval = config.interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    daemon.run(request_rx, ticker, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoadAvgSection, SoftRaidSection};
    use std::path::PathBuf;
    use std::time::Duration;
    use sysguard_client::SensorClient;
    use sysguard_core::SensorType;
    use tokio::sync::oneshot;

    const MDSTAT: &str = "\
Personalities : [raid1]
md0 : active raid1 sdb1[1] sda1[0]
      1048576 blocks super 1.2 [2/2] [UU]

unused devices: <none>
";

    fn config(mdstat: &tempfile::NamedTempFile) -> Config {
        Config {
            softraid: SoftRaidSection {
                mdstat: mdstat.path().to_path_buf(),
                mdadm: PathBuf::from("/nonexistent/mdadm"),
                ..SoftRaidSection::default()
            },
            loadavg: LoadAvgSection { enable: false },
            ..Config::default()
        }
    }

    async fn start(
        config: Config,
        interval: Duration,
    ) -> (
        SocketAddr,
        impl std::future::Future<Output = Result<()>>,
        oneshot::Sender<()>,
    ) {
        let (signal_tx, _) = broadcast::channel(16);
        let (request_tx, request_rx) = mpsc::channel(16);

        let mut daemon = Daemon::new(signal_tx.clone());
        daemon.load_modules(&config).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server::serve(listener, request_tx, signal_tx));

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        let run = daemon.run(request_rx, ticker, async move {
            let _ = stop_rx.await;
        });
        (addr, run, stop_tx)
    }

    #[tokio::test]
    async fn test_client_round_trip() {
        let mdstat = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(mdstat.path(), MDSTAT).unwrap();
        let (addr, run, stop_tx) = start(config(&mdstat), Duration::from_secs(3600)).await;

        let client = async move {
            let mut client = SensorClient::connect(&addr.to_string()).await.unwrap();

            assert_eq!(
                client.value("SoftRaid/md0/NumBlocks").await.unwrap(),
                "1048576"
            );
            let info = client.info("SoftRaid/md0/NumBlocks").await.unwrap();
            assert_eq!(info.label, "Number of blocks");
            assert_eq!(info.unit, "blocks");

            let monitors = client.monitors().await.unwrap();
            assert_eq!(
                monitors,
                vec![("SoftRaid/md0/NumBlocks".to_string(), SensorType::Integer)]
            );

            assert!(client.value("SoftRaid/md9/NumBlocks").await.is_err());
            // The connection survives an unknown path.
            assert_eq!(
                client.value("SoftRaid/md0/NumBlocks").await.unwrap(),
                "1048576"
            );

            client.quit().await.unwrap();
            stop_tx.send(()).unwrap();
        };

        let (result, ()) = tokio::join!(run, client);
        result.unwrap();
    }

    #[tokio::test]
    async fn test_vanished_array_notifies_clients() {
        let mdstat = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(mdstat.path(), MDSTAT).unwrap();
        let (addr, run, stop_tx) = start(config(&mdstat), Duration::from_millis(50)).await;
        let mdstat_path = mdstat.path().to_path_buf();

        let client = async move {
            let mut client = SensorClient::connect(&addr.to_string()).await.unwrap();
            assert!(client.value("SoftRaid/md0/NumBlocks").await.is_ok());

            std::fs::write(&mdstat_path, "Personalities : [raid1]\n").unwrap();

            let mut notified = false;
            for _ in 0..100 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = client.monitors().await.unwrap();
                if client.take_reconfigure() {
                    notified = true;
                    break;
                }
            }
            assert!(notified, "no reconfigure notification received");
            assert!(client.monitors().await.unwrap().is_empty());
            assert!(client.value("SoftRaid/md0/NumBlocks").await.is_err());

            stop_tx.send(()).unwrap();
        };

        let (result, ()) = tokio::join!(run, client);
        result.unwrap();
    }
}
