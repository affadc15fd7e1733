//! In-memory lane hardware for tests and the `sim` binary
//!
//! `SimulatedLane` stands in for the serial lane I/O board and
//! `ScriptedPlateReader` for the camera/ANPR pair, so full gate cycles can
//! run without a serial bus or HTTP collaborators.

use crate::domain::types::{PlateId, SensorLocation, Snapshot};
use crate::io::anpr::PlateReader;
use crate::io::hal::{PresenceInputs, ServoDrive};
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Simulated presence inputs and barrier servo for one lane.
///
/// Atomics provide interior mutability behind the shared hardware traits;
/// a lane is driven by a single control task, so ordering is not load-bearing.
#[derive(Default)]
pub struct SimulatedLane {
    before: AtomicBool,
    under: AtomicBool,
    behind: AtomicBool,
    fail_reads: AtomicBool,
    angle: AtomicU8,
}

impl SimulatedLane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place or remove a vehicle at one sensor position
    pub fn set_present(&self, location: SensorLocation, present: bool) {
        match location {
            SensorLocation::BeforeBar => self.before.store(present, Ordering::Relaxed),
            SensorLocation::UnderBar => self.under.store(present, Ordering::Relaxed),
            SensorLocation::BehindBar => self.behind.store(present, Ordering::Relaxed),
        }
    }

    /// Make subsequent hardware reads fail (exercises the fail-safe default)
    pub fn set_read_failure(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Current arm angle as last driven by the actuator
    pub fn angle(&self) -> u8 {
        self.angle.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PresenceInputs for SimulatedLane {
    async fn sample(&self) -> anyhow::Result<[bool; 3]> {
        if self.fail_reads.load(Ordering::Relaxed) {
            bail!("simulated sensor read failure");
        }
        Ok([
            self.before.load(Ordering::Relaxed),
            self.under.load(Ordering::Relaxed),
            self.behind.load(Ordering::Relaxed),
        ])
    }
}

#[async_trait]
impl ServoDrive for SimulatedLane {
    async fn set_angle(&self, degrees: u8) -> anyhow::Result<()> {
        self.angle.store(degrees, Ordering::Relaxed);
        Ok(())
    }
}

/// Scripted camera/ANPR stand-in: recognition always yields the currently
/// scripted plate (or a miss when none is scripted)
#[derive(Default)]
pub struct ScriptedPlateReader {
    plate: Mutex<Option<PlateId>>,
    fail_capture: AtomicBool,
    captures: AtomicU64,
    recognitions: AtomicU64,
}

impl ScriptedPlateReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the plate the next recognitions will read (None = miss)
    pub fn set_plate(&self, plate: Option<PlateId>) {
        *self.plate.lock() = plate;
    }

    /// Make subsequent captures fail
    pub fn set_capture_failure(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::Relaxed);
    }

    pub fn capture_count(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }

    pub fn recognition_count(&self) -> u64 {
        self.recognitions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PlateReader for ScriptedPlateReader {
    async fn capture(&self) -> Option<Snapshot> {
        self.captures.fetch_add(1, Ordering::Relaxed);
        if self.fail_capture.load(Ordering::Relaxed) {
            return None;
        }
        Some(Snapshot::default())
    }

    async fn recognize(&self, _snapshot: &Snapshot) -> Option<PlateId> {
        self.recognitions.fetch_add(1, Ordering::Relaxed);
        self.plate.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_lane_sample() {
        let lane = SimulatedLane::new();
        assert_eq!(lane.sample().await.unwrap(), [false, false, false]);

        lane.set_present(SensorLocation::BeforeBar, true);
        lane.set_present(SensorLocation::BehindBar, true);
        assert_eq!(lane.sample().await.unwrap(), [true, false, true]);
    }

    #[tokio::test]
    async fn test_simulated_lane_read_failure() {
        let lane = SimulatedLane::new();
        lane.set_read_failure(true);
        assert!(lane.sample().await.is_err());

        lane.set_read_failure(false);
        assert!(lane.sample().await.is_ok());
    }

    #[tokio::test]
    async fn test_simulated_servo() {
        let lane = SimulatedLane::new();
        lane.set_angle(42).await.unwrap();
        assert_eq!(lane.angle(), 42);
    }

    #[tokio::test]
    async fn test_scripted_reader() {
        let reader = ScriptedPlateReader::new();
        let snapshot = reader.capture().await.unwrap();
        assert!(reader.recognize(&snapshot).await.is_none());

        reader.set_plate(Some(PlateId::from("PO 156VN")));
        assert_eq!(reader.recognize(&snapshot).await, Some(PlateId::from("PO 156VN")));
        assert_eq!(reader.capture_count(), 1);
        assert_eq!(reader.recognition_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_reader_capture_failure() {
        let reader = ScriptedPlateReader::new();
        reader.set_capture_failure(true);
        assert!(reader.capture().await.is_none());
    }
}
