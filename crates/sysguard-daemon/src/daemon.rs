//! Daemon context and event loop.
//!
//! The daemon owns the registry and every loaded module. Scans and client
//! requests are separate arms of one loop, so a request never observes a
//! registry halfway through a scan.

use std::future::Future;

use anyhow::{Context, Result};
use sysguard_core::modules::{LoadAvgModule, SoftRaidModule};
use sysguard_core::protocol::{self, Response};
use sysguard_core::{CommandRunner, SensorModule, SensorRegistry, UpdateStatus};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Interval;
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// Notifications pushed to every connected client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DaemonSignal {
    /// The sensor set changed; clients must re-enumerate.
    Reconfigure,
}

/// A request line forwarded from a client connection.
#[derive(Debug)]
pub struct Request {
    pub line: String,
    pub reply: oneshot::Sender<Response>,
}

/// Daemon state owned by the event loop.
pub struct Daemon {
    registry: SensorRegistry,
    modules: Vec<Box<dyn SensorModule>>,
    signal_tx: broadcast::Sender<DaemonSignal>,
}

impl Daemon {
    pub fn new(signal_tx: broadcast::Sender<DaemonSignal>) -> Self {
        Self {
            registry: SensorRegistry::new(),
            modules: Vec::new(),
            signal_tx,
        }
    }

    /// Initializes a module and adds it to the tick rotation.
    pub async fn add_module(&mut self, mut module: Box<dyn SensorModule>) -> Result<()> {
        let name = module.name();
        let before = self.registry.len();
        module
            .init(&mut self.registry)
            .await
            .with_context(|| format!("Failed to initialize module {}", name))?;
        info!(
            module = name,
            sensors = self.registry.len() - before,
            "Module loaded"
        );
        self.modules.push(module);
        Ok(())
    }

    /// Loads the modules enabled in the configuration.
    pub async fn load_modules(&mut self, config: &Config) -> Result<()> {
        if config.loadavg.enable {
            self.add_module(Box::new(LoadAvgModule::new())).await?;
        }
        if config.softraid.enable {
            let runner = CommandRunner::with_timeout(config.softraid.helper_timeout());
            let module = SoftRaidModule::new(config.softraid.module_config(), Box::new(runner));
            self.add_module(Box::new(module)).await?;
        }
        Ok(())
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    /// Runs one update of every module.
    ///
    /// Non-fatal module errors are logged and the remaining modules still
    /// run. A fatal error stops the tick and is returned.
    pub async fn tick(&mut self) -> Result<()> {
        let mut reconfigure = false;

        for module in &mut self.modules {
            match module.update(&mut self.registry).await {
                Ok(UpdateStatus::Unchanged) => {}
                Ok(UpdateStatus::Reconfigure) => reconfigure = true,
                Err(e) if e.is_fatal() => {
                    error!(module = module.name(), error = %e, "Fatal module error");
                    return Err(e).context("Module update failed");
                }
                Err(e) => warn!(module = module.name(), error = %e, "Module update failed"),
            }
        }

        if reconfigure {
            info!("Sensor set changed, asking clients to reconfigure");
            // No receivers just means no clients are connected.
            let _ = self.signal_tx.send(DaemonSignal::Reconfigure);
        }
        Ok(())
    }

    /// Answers one request line.
    pub fn handle(&self, line: &str) -> Response {
        debug!(request = line.trim_end(), "Handling request");
        protocol::respond(&self.registry, line)
    }

    /// Runs the event loop until `shutdown` resolves or every request sender
    /// is gone, then tears the modules down.
    ///
    /// A tick that is due always runs before queued requests are served.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut ticker: Interval,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        break Err(e);
                    }
                }
                request = requests.recv() => match request {
                    Some(request) => {
                        // The client may have hung up already.
                        let _ = request.reply.send(self.handle(&request.line));
                    }
                    None => break Ok(()),
                },
            }
        };

        self.shutdown();
        result
    }

    /// Tears down every module, removing all of their sensors.
    pub fn shutdown(&mut self) {
        for module in &mut self.modules {
            module.teardown(&mut self.registry);
            let leftover = self.registry.remove_owned_by(module.name());
            if leftover > 0 {
                warn!(
                    module = module.name(),
                    leftover, "Module left sensors registered after teardown"
                );
            }
            debug!(module = module.name(), "Module torn down");
        }
        self.modules.clear();
    }
}
