//! Presence sensor array for one lane
//!
//! Three fixed sensors (before, under, behind the bar) re-sampled from
//! hardware once per refresh. A failed read deliberately reads as "no
//! vehicle anywhere": blocking passage is always preferable to a false
//! admission.

use crate::domain::types::{Sensor, SensorLocation};
use crate::infra::metrics::Metrics;
use crate::io::hal::PresenceInputs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Shared read-only view of the lane's presence sensors.
///
/// The gate controller and the barrier actuator both sample this array
/// (the actuator needs the under-bar zone during a closing sweep). Each
/// lane is driven by a single control task; the atomics only provide
/// interior mutability behind the shared handle.
pub struct SensorArray {
    inputs: Arc<dyn PresenceInputs>,
    metrics: Arc<Metrics>,
    before: AtomicBool,
    under: AtomicBool,
    behind: AtomicBool,
}

impl SensorArray {
    pub fn new(inputs: Arc<dyn PresenceInputs>, metrics: Arc<Metrics>) -> Self {
        Self {
            inputs,
            metrics,
            before: AtomicBool::new(false),
            under: AtomicBool::new(false),
            behind: AtomicBool::new(false),
        }
    }

    /// Re-sample all three presence sensors from hardware.
    ///
    /// Side effect only; never fails out. A failed read stores `false`
    /// for every location.
    pub async fn refresh(&self) {
        let values = match self.inputs.sample().await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "sensor_read_failed");
                self.metrics.record_sensor_read_failure();
                [false, false, false]
            }
        };
        self.before.store(values[0], Ordering::Relaxed);
        self.under.store(values[1], Ordering::Relaxed);
        self.behind.store(values[2], Ordering::Relaxed);
    }

    /// Current reading of one sensor
    pub fn sensor(&self, location: SensorLocation) -> Sensor {
        let present = match location {
            SensorLocation::BeforeBar => self.before.load(Ordering::Relaxed),
            SensorLocation::UnderBar => self.under.load(Ordering::Relaxed),
            SensorLocation::BehindBar => self.behind.load(Ordering::Relaxed),
        };
        Sensor { location, present }
    }

    /// A vehicle is waiting at the approach and has not reached the bar.
    /// Not exclusive with `vehicle_behind_bar` - two vehicles can occupy
    /// the lane at once.
    pub fn vehicle_before_bar(&self) -> bool {
        self.before.load(Ordering::Relaxed) && !self.under.load(Ordering::Relaxed)
    }

    /// A vehicle occupies the zone swept by the bar
    pub fn vehicle_under_bar(&self) -> bool {
        self.under.load(Ordering::Relaxed)
    }

    /// A vehicle has cleared the bar on the far side
    pub fn vehicle_behind_bar(&self) -> bool {
        !self.under.load(Ordering::Relaxed) && self.behind.load(Ordering::Relaxed)
    }

    /// No vehicle anywhere near the bar
    pub fn lane_clear(&self) -> bool {
        !self.before.load(Ordering::Relaxed)
            && !self.under.load(Ordering::Relaxed)
            && !self.behind.load(Ordering::Relaxed)
    }
}
