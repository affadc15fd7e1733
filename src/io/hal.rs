//! Hardware abstraction for a lane: presence inputs and the barrier servo
//!
//! The gate core only sees these two traits. Production lanes are backed by
//! the serial lane I/O board (`LaneLink`); tests and the `sim` binary use
//! the in-memory `SimulatedLane`.

use async_trait::async_trait;

/// The three digital presence inputs of a lane, in fixed order:
/// `[before_bar, under_bar, behind_bar]`
#[async_trait]
pub trait PresenceInputs: Send + Sync {
    /// Sample all three inputs from hardware.
    ///
    /// Errors are surfaced so the sensor array can apply its fail-safe
    /// default (treat every zone as empty rather than admit blindly).
    async fn sample(&self) -> anyhow::Result<[bool; 3]>;
}

/// PWM-style barrier servo output
#[async_trait]
pub trait ServoDrive: Send + Sync {
    /// Drive the barrier arm to the target angle in degrees (0 = lowered,
    /// 90 = raised). The angle-to-duty mapping is a calibration detail of
    /// the implementation.
    async fn set_angle(&self, degrees: u8) -> anyhow::Result<()>;
}
