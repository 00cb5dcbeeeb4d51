//! UDP beacon that lets robots find the coordinator on the local network.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use fleet_protocol::DISCOVERY_PREFIX;

use crate::config::NetworkConfig;

pub struct DiscoveryBroadcaster {
    advertise_ip: String,
    port: u16,
    target: String,
    interval: Duration,
}

impl DiscoveryBroadcaster {
    pub fn new(advertise_ip: impl Into<String>, port: u16, broadcast_port: u16, interval: Duration) -> Self {
        Self {
            advertise_ip: advertise_ip.into(),
            port,
            target: format!("255.255.255.255:{broadcast_port}"),
            interval,
        }
    }

    pub fn from_config(network: &NetworkConfig, port: u16) -> Self {
        Self::new(
            network.advertise_ip.clone(),
            port,
            network.broadcast_port,
            Duration::from_secs(network.broadcast_interval_secs),
        )
    }

    /// `SERVER:<ip>:<port>`
    pub fn beacon(&self) -> String {
        format!("{DISCOVERY_PREFIX}:{}:{}", self.advertise_ip, self.port)
    }

    /// Broadcast until shutdown. A send error stops the beacon.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        let beacon = self.beacon();
        tracing::info!(target_addr = %self.target, beacon = %beacon, "Discovery broadcast started");

        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    socket.send_to(beacon.as_bytes(), &self.target).await?;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Discovery broadcast stopped");
        Ok(())
    }
}
