//! Barrier actuation with dwell timing and the under-bar safety interlock
//!
//! The actuator owns the barrier's state and angular position and turns
//! open/close intents into safe physical motion:
//! - `open()` sweeps the arm up and stamps the opening time
//! - `close()` refuses until the minimum dwell has elapsed, then sweeps
//!   down while holding position whenever the under-bar zone is occupied.
//!   A zone that stays occupied past the sample bound aborts the close
//!   (the arm returns to fully open) instead of spinning forever.

use crate::domain::types::{BarrierState, CloseOutcome, LaneRole};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::{EgressSender, LaneEventPayload};
use crate::io::hal::ServoDrive;
use crate::services::sensors::SensorArray;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Fully-raised arm angle in degrees
const FULLY_OPEN_DEGREES: u8 = 90;

pub struct BarrierActuator {
    lane: LaneRole,
    servo: Arc<dyn ServoDrive>,
    sensors: Arc<SensorArray>,
    metrics: Arc<Metrics>,
    egress: Option<EgressSender>,
    state: BarrierState,
    position: u8,
    opened_at: Option<Instant>,
    min_dwell: Duration,
    sweep_step: u8,
    step_interval: Duration,
    obstruction_max_samples: u32,
    obstruction_sample_interval: Duration,
}

impl BarrierActuator {
    pub fn new(
        lane: LaneRole,
        config: &Config,
        servo: Arc<dyn ServoDrive>,
        sensors: Arc<SensorArray>,
        metrics: Arc<Metrics>,
        egress: Option<EgressSender>,
    ) -> Self {
        metrics.set_barrier_state(lane, BarrierState::Closed);
        Self {
            lane,
            servo,
            sensors,
            metrics,
            egress,
            state: BarrierState::Closed,
            position: 0,
            opened_at: None,
            min_dwell: Duration::from_secs(config.min_dwell_secs()),
            sweep_step: config.sweep_step_degrees().max(1),
            step_interval: Duration::from_millis(config.step_interval_ms()),
            obstruction_max_samples: config.obstruction_max_samples(),
            obstruction_sample_interval: Duration::from_millis(
                config.obstruction_sample_interval_ms(),
            ),
        }
    }

    pub fn state(&self) -> BarrierState {
        self.state
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Raise the barrier. No-op while already Open.
    pub async fn open(&mut self) {
        if self.state == BarrierState::Open {
            trace!(lane = %self.lane.as_str(), "barrier_already_open");
            return;
        }

        info!(lane = %self.lane.as_str(), "barrier_opening");
        while self.position < FULLY_OPEN_DEGREES {
            let next = self.position.saturating_add(self.sweep_step).min(FULLY_OPEN_DEGREES);
            self.drive(next).await;
            sleep(self.step_interval).await;
        }

        self.state = BarrierState::Open;
        self.opened_at = Some(Instant::now());
        self.metrics.record_barrier_open();
        self.metrics.set_barrier_state(self.lane, self.state);
        self.emit("barrier_opened");
        info!(lane = %self.lane.as_str(), position = %self.position, "barrier_opened");
    }

    /// Lower the barrier. No-op while already Closed.
    ///
    /// Non-blocking with respect to the dwell: returns `DwellPending`
    /// without touching state when the minimum dwell since opening has not
    /// elapsed, and the caller retries on a later tick. The dwell gate is
    /// evaluated once, at the moment the closing sweep begins.
    pub async fn close(&mut self) -> CloseOutcome {
        if self.state == BarrierState::Closed {
            trace!(lane = %self.lane.as_str(), "barrier_already_closed");
            return CloseOutcome::Closed;
        }

        match self.opened_at {
            Some(opened_at) => {
                let elapsed = opened_at.elapsed();
                if elapsed < self.min_dwell {
                    debug!(
                        lane = %self.lane.as_str(),
                        remaining_ms = %(self.min_dwell - elapsed).as_millis(),
                        "barrier_close_dwell_pending"
                    );
                    return CloseOutcome::DwellPending;
                }
            }
            // Open without a timestamp cannot be reached through open();
            // close anyway rather than leave the bar stuck up
            None => warn!(lane = %self.lane.as_str(), "barrier_open_without_timestamp"),
        }

        info!(lane = %self.lane.as_str(), "barrier_closing");
        while self.position > 0 {
            if !self.wait_for_clear_zone().await {
                self.abort_close().await;
                return CloseOutcome::Obstructed;
            }
            let next = self.position.saturating_sub(self.sweep_step);
            self.drive(next).await;
            sleep(self.step_interval).await;
        }

        self.state = BarrierState::Closed;
        self.opened_at = None;
        self.metrics.record_barrier_close();
        self.metrics.set_barrier_state(self.lane, self.state);
        self.emit("barrier_closed");
        info!(lane = %self.lane.as_str(), position = %self.position, "barrier_closed");
        CloseOutcome::Closed
    }

    /// Hold position until the under-bar zone clears, re-sampling the
    /// sensors between checks. Returns false once the sample bound is
    /// exhausted.
    async fn wait_for_clear_zone(&mut self) -> bool {
        self.sensors.refresh().await;
        let mut samples = 0u32;
        while self.sensors.vehicle_under_bar() {
            if samples >= self.obstruction_max_samples {
                return false;
            }
            samples += 1;
            trace!(
                lane = %self.lane.as_str(),
                position = %self.position,
                samples = %samples,
                "barrier_close_holding"
            );
            sleep(self.obstruction_sample_interval).await;
            self.sensors.refresh().await;
        }
        true
    }

    /// The zone stayed occupied past the bound: give up on this close and
    /// return the arm to fully open. State remains Open and the original
    /// `opened_at` is kept, so a later close is not re-gated by the dwell.
    async fn abort_close(&mut self) {
        warn!(
            lane = %self.lane.as_str(),
            position = %self.position,
            max_samples = %self.obstruction_max_samples,
            "barrier_close_obstructed"
        );
        self.metrics.record_close_obstruction();

        while self.position < FULLY_OPEN_DEGREES {
            let next = self.position.saturating_add(self.sweep_step).min(FULLY_OPEN_DEGREES);
            self.drive(next).await;
            sleep(self.step_interval).await;
        }
        self.emit("close_obstructed");
    }

    /// Drive the servo one step. The software position stays authoritative
    /// on a write failure; the board re-syncs on the next step.
    async fn drive(&mut self, degrees: u8) {
        if let Err(e) = self.servo.set_angle(degrees).await {
            error!(
                lane = %self.lane.as_str(),
                degrees = %degrees,
                error = %e,
                "servo_drive_failed"
            );
        }
        self.position = degrees;
    }

    fn emit(&self, event: &str) {
        if let Some(ref egress) = self.egress {
            egress.send_lane_event(
                LaneEventPayload::new(self.lane.as_str(), event).with_position(self.position),
            );
        }
    }
}
