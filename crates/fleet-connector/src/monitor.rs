//! Periodic liveness audit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use fleet_state::{liveness, FleetRegistry, LossOfContact};

pub struct LivenessMonitor {
    registry: Arc<FleetRegistry>,
    timeout: Duration,
    sweep_interval: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<FleetRegistry>, timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            registry,
            timeout,
            sweep_interval,
        }
    }

    /// Run one sweep now and log each robot that went silent.
    pub async fn sweep_once(&self) -> Vec<LossOfContact> {
        let lost = liveness::sweep(&self.registry, self.timeout, Instant::now()).await;
        for loss in &lost {
            tracing::error!(
                robot = %loss.robot,
                silent_secs = loss.silent_for.as_secs(),
                previous_state = %loss.previous_state,
                detected_at = %loss.detected_at.to_rfc3339(),
                "Lost contact with robot"
            );
        }
        lost
    }

    /// Sweep every `sweep_interval` until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            timeout_secs = self.timeout.as_secs(),
            interval_secs = self.sweep_interval.as_secs(),
            "Liveness monitor started"
        );
        let mut tick = tokio::time::interval(self.sweep_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Liveness monitor stopped");
    }
}
