//! The coordinator process: owns the shared registry and runs every
//! long-lived task.
//!
//! Startup order:
//! 1. Validate config and build the registry, handoff coordinator and router.
//! 2. Bind the uplink, downlink and liveness listeners.
//! 3. Spawn the listeners, the liveness monitor and the discovery beacon.
//! 4. Optionally run the operator console on stdin.
//! 5. Wait for Ctrl-C or an external shutdown, then stop everything.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use fleet_protocol::FleetError;
use fleet_state::{FleetRegistry, HandoffCoordinator};

use crate::config::CoordinatorConfig;
use crate::discovery::DiscoveryBroadcaster;
use crate::monitor::LivenessMonitor;
use crate::operator_console::run_console;
use crate::router::CommandRouter;
use crate::server::{Channel, ChannelServer};

/// The three bound robot-facing listeners.
pub struct BoundListeners {
    pub uplink: TcpListener,
    pub downlink: TcpListener,
    pub liveness: TcpListener,
}

impl BoundListeners {
    pub async fn bind(config: &CoordinatorConfig) -> Result<Self, anyhow::Error> {
        let network = &config.network;
        Ok(Self {
            uplink: TcpListener::bind(network.uplink_addr()).await?,
            downlink: TcpListener::bind(network.downlink_addr()).await?,
            liveness: TcpListener::bind(network.liveness_addr()).await?,
        })
    }

    /// Local addresses as `(uplink, downlink, liveness)`.
    pub fn local_addrs(&self) -> std::io::Result<(SocketAddr, SocketAddr, SocketAddr)> {
        Ok((
            self.uplink.local_addr()?,
            self.downlink.local_addr()?,
            self.liveness.local_addr()?,
        ))
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<FleetRegistry>,
    handoff: Arc<HandoffCoordinator>,
    router: Arc<CommandRouter>,
    shutdown_tx: watch::Sender<bool>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Result<Self, FleetError> {
        config.validate()?;

        let registry = Arc::new(FleetRegistry::new());
        let handoff = Arc::new(HandoffCoordinator::new(config.handoff_policy()));
        let router = Arc::new(CommandRouter::new(
            Arc::clone(&registry),
            config.fleet.roster(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            registry,
            handoff,
            router,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<FleetRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn handoff(&self) -> Arc<HandoffCoordinator> {
        Arc::clone(&self.handoff)
    }

    pub fn router(&self) -> Arc<CommandRouter> {
        Arc::clone(&self.router)
    }

    pub async fn bind(&self) -> Result<BoundListeners, anyhow::Error> {
        BoundListeners::bind(&self.config).await
    }

    /// Spawn the listeners and periodic tasks. They run until `shutdown`.
    pub fn start(&self, listeners: BoundListeners) -> Result<Vec<JoinHandle<()>>, anyhow::Error> {
        let advertised_port = listeners.uplink.local_addr()?.port();
        let max_connections = self.config.network.max_connections;
        let token_len = self.config.liveness.token_len;
        let mut tasks = Vec::new();

        for (channel, listener) in [
            (Channel::Uplink, listeners.uplink),
            (Channel::Downlink, listeners.downlink),
            (Channel::Liveness, listeners.liveness),
        ] {
            let server = ChannelServer::new(
                channel,
                listener,
                Arc::clone(&self.registry),
                Arc::clone(&self.handoff),
                max_connections,
                token_len,
            );
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run(shutdown).await {
                    tracing::error!(channel = %channel, error = %e, "Listener failed");
                }
            }));
        }

        let monitor = LivenessMonitor::new(
            Arc::clone(&self.registry),
            self.config.liveness.timeout(),
            self.config.liveness.sweep_interval(),
        );
        tasks.push(tokio::spawn(monitor.run(self.shutdown_tx.subscribe())));

        if self.config.network.discovery {
            let broadcaster = DiscoveryBroadcaster::from_config(&self.config.network, advertised_port);
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = broadcaster.run(shutdown).await {
                    tracing::error!(error = %e, "Discovery broadcast stopped");
                }
            }));
        }

        Ok(tasks)
    }

    /// Signal every task started by this coordinator to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run until Ctrl-C or [`Coordinator::shutdown`].
    pub async fn run(&self) -> Result<(), anyhow::Error> {
        let listeners = self.bind().await?;
        let (uplink, downlink, liveness) = listeners.local_addrs()?;
        tracing::info!(
            uplink = %uplink,
            downlink = %downlink,
            liveness = %liveness,
            robots = self.config.fleet.robots.len(),
            "Fleet coordinator starting"
        );

        let tasks = self.start(listeners)?;

        if self.config.operator.enabled {
            let router = self.router();
            let shortcuts = self.config.operator.shortcuts.clone();
            let shutdown = self.shutdown_tx.subscribe();
            // Not joined: a blocked stdin read cannot be cancelled.
            tokio::spawn(async move {
                let stdin = BufReader::new(tokio::io::stdin());
                if let Err(e) = run_console(stdin, tokio::io::stdout(), &router, &shortcuts, shutdown).await {
                    tracing::error!(error = %e, "Operator console failed");
                }
            });
        }

        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Interrupt received, shutting down");
            }
            _ = shutdown.wait_for(|stop| *stop) => {}
        }

        self.shutdown();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Task ended abnormally");
            }
        }
        tracing::info!("Fleet coordinator stopped");
        Ok(())
    }
}
