//! Shared types for the parking gate controller

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Newtype wrapper for recognized plate numbers to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PlateId(pub String);

impl PlateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlateId {
    fn from(s: &str) -> Self {
        PlateId(s.to_string())
    }
}

/// Fixed approach positions of the three presence sensors in a lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorLocation {
    BeforeBar,
    UnderBar,
    BehindBar,
}

impl SensorLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorLocation::BeforeBar => "before_bar",
            SensorLocation::UnderBar => "under_bar",
            SensorLocation::BehindBar => "behind_bar",
        }
    }
}

/// One presence sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sensor {
    pub location: SensorLocation,
    pub present: bool,
}

/// Barrier rest states. `position` is 0 while Closed and 90 while Open;
/// intermediate angles only exist inside a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Closed,
    Open,
}

impl BarrierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarrierState::Closed => "closed",
            BarrierState::Open => "open",
        }
    }
}

/// Outcome of a `close()` attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Barrier is closed (either this call completed the sweep or it
    /// already was closed)
    Closed,
    /// Minimum dwell since opening has not elapsed; no state change
    DwellPending,
    /// The under-bar zone stayed occupied past the sample bound; the
    /// barrier returned to fully open and remains Open
    Obstructed,
}

impl CloseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseOutcome::Closed => "closed",
            CloseOutcome::DwellPending => "dwell_pending",
            CloseOutcome::Obstructed => "obstructed",
        }
    }
}

/// Which admission predicate and committed side effect a lane runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneRole {
    Entrance,
    Exit,
}

impl LaneRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneRole::Entrance => "entrance",
            LaneRole::Exit => "exit",
        }
    }
}

/// A captured camera frame, handed opaque to the recognizer
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub jpeg: Bytes,
}

impl Snapshot {
    pub fn new(jpeg: Bytes) -> Self {
        Self { jpeg }
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}
