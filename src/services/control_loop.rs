//! Lane control loop - drives a gate controller at the polling cadence
//!
//! Trivial driver around `GateController::tick()`: one loop per lane,
//! running until the shutdown signal flips. Entrance and exit loops are
//! independent tasks over disjoint hardware.

use crate::services::gate::GateController;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

pub struct ControlLoop {
    controller: GateController,
    poll_interval: Duration,
}

impl ControlLoop {
    pub fn new(controller: GateController, poll_interval_ms: u64) -> Self {
        Self { controller, poll_interval: Duration::from_millis(poll_interval_ms) }
    }

    /// Run ticks until shutdown. A tick can outlast the poll interval
    /// (barrier sweeps take real time); missed ticks are delayed rather
    /// than bursted.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            lane = %self.controller.role().as_str(),
            poll_interval_ms = %self.poll_interval.as_millis(),
            "control_loop_started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.controller.tick().await;
                }
            }
        }

        info!(lane = %self.controller.role().as_str(), "control_loop_stopped");
    }

    /// Run exactly one tick (single-cycle testing and the sim binary)
    pub async fn tick_once(&mut self) {
        self.controller.tick().await;
    }

    pub fn controller(&self) -> &GateController {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::LaneRole;
    use crate::infra::config::Config;
    use crate::infra::metrics::Metrics;
    use crate::io::simulator::{ScriptedPlateReader, SimulatedLane};
    use crate::services::barrier::BarrierActuator;
    use crate::services::sensors::SensorArray;
    use crate::services::session_store::InMemorySessionStore;
    use std::sync::Arc;

    fn control_loop() -> ControlLoop {
        let config = Config::default();
        let lane = Arc::new(SimulatedLane::new());
        let metrics = Arc::new(Metrics::new());
        let sensors = Arc::new(SensorArray::new(lane.clone(), metrics.clone()));
        let barrier = BarrierActuator::new(
            LaneRole::Entrance,
            &config,
            lane,
            sensors.clone(),
            metrics.clone(),
            None,
        );
        let store = Arc::new(InMemorySessionStore::new(&config, metrics.clone(), None, None));
        let controller = GateController::new(
            LaneRole::Entrance,
            sensors,
            barrier,
            Arc::new(ScriptedPlateReader::new()),
            store,
            metrics,
            None,
        );
        ControlLoop::new(controller, 50)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let control_loop = control_loop();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(control_loop.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown_tx.send(true).unwrap();

        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_once_is_single_cycle() {
        let mut control_loop = control_loop();
        control_loop.tick_once().await;
        assert_eq!(
            control_loop.controller().barrier().state(),
            crate::domain::types::BarrierState::Closed
        );
    }
}
