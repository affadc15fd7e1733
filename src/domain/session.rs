//! Vehicle session data model
//!
//! A session is the persistence-side record of one vehicle's stay:
//! created when the entrance lane commits an entry, settled when the pay
//! station bills it, released when the exit lane commits the departure.

use crate::domain::types::PlateId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Entry committed, vehicle inside the lot
    Created,
    /// Fee computed and paid at the kiosk
    FeeSettled,
    /// Exit committed, vehicle gone
    Released,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::FeeSettled => "fee_settled",
            SessionState::Released => "released",
        }
    }
}

/// One vehicle's occupancy record, keyed by plate
#[derive(Debug, Clone, Serialize)]
pub struct VehicleSession {
    /// UUIDv7 session ID
    pub sid: String,
    pub plate: PlateId,
    pub state: SessionState,
    pub entered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
    /// Billed interval in whole started minutes, set when the fee is
    /// finalized at the pay station
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parked_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<f64>,
    pub fee_paid: bool,
}

impl VehicleSession {
    pub fn new(plate: PlateId) -> Self {
        Self {
            sid: new_uuid_v7(),
            plate,
            state: SessionState::Created,
            entered_at: Utc::now(),
            exited_at: None,
            parked_minutes: None,
            fee: None,
            fee_paid: false,
        }
    }

    /// End the billed interval and compute the fee at the given hourly rate.
    /// Idempotent once settled: repeated calls keep the first billing.
    pub fn finalize_fee(&mut self, hourly_rate: f64) {
        if self.parked_minutes.is_some() {
            return;
        }
        let now = Utc::now();
        let minutes = billed_minutes(self.entered_at, now);
        self.parked_minutes = Some(minutes);
        self.fee = Some(compute_fee(minutes, hourly_rate));
        self.exited_at = Some(now);
    }

    /// Payment status update from the kiosk
    pub fn mark_fee_paid(&mut self) {
        self.fee_paid = true;
        self.state = SessionState::FeeSettled;
    }

    /// Exit committed; the vehicle has cleared the bar
    pub fn release(&mut self) {
        self.state = SessionState::Released;
        if self.exited_at.is_none() {
            self.exited_at = Some(Utc::now());
        }
    }

    pub fn is_released(&self) -> bool {
        self.state == SessionState::Released
    }

    /// JSONL line for the session egress file
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Whole started minutes between entry and exit, never less than one
pub fn billed_minutes(entered_at: DateTime<Utc>, exited_at: DateTime<Utc>) -> i64 {
    let secs = (exited_at - entered_at).num_seconds().max(0);
    (secs / 60 + i64::from(secs % 60 != 0)).max(1)
}

/// Pro-rata fee per started minute at the given hourly rate, rounded to
/// two decimals
pub fn compute_fee(minutes: i64, hourly_rate: f64) -> f64 {
    let raw = minutes as f64 * hourly_rate / 60.0;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_session() {
        let session = VehicleSession::new(PlateId::from("PO 156VN"));

        assert!(!session.sid.is_empty());
        assert_eq!(session.sid.len(), 36); // UUIDv7 with hyphens
        assert_eq!(session.plate, PlateId::from("PO 156VN"));
        assert_eq!(session.state, SessionState::Created);
        assert!(session.exited_at.is_none());
        assert!(session.fee.is_none());
        assert!(!session.fee_paid);
    }

    #[test]
    fn test_billed_minutes_rounds_up() {
        let t0 = Utc::now();
        assert_eq!(billed_minutes(t0, t0 + Duration::seconds(59)), 1);
        assert_eq!(billed_minutes(t0, t0 + Duration::seconds(60)), 1);
        assert_eq!(billed_minutes(t0, t0 + Duration::seconds(61)), 2);
        assert_eq!(billed_minutes(t0, t0 + Duration::minutes(90)), 90);
    }

    #[test]
    fn test_billed_minutes_floor_one() {
        let t0 = Utc::now();
        assert_eq!(billed_minutes(t0, t0), 1);
        // Clock skew must not produce a negative bill
        assert_eq!(billed_minutes(t0, t0 - Duration::seconds(30)), 1);
    }

    #[test]
    fn test_compute_fee() {
        assert_eq!(compute_fee(60, 2.5), 2.5);
        assert_eq!(compute_fee(90, 2.5), 3.75);
        assert_eq!(compute_fee(1, 2.5), 0.04);
    }

    #[test]
    fn test_finalize_fee_idempotent() {
        let mut session = VehicleSession::new(PlateId::from("WY 8686W"));
        session.finalize_fee(2.5);
        let first_fee = session.fee;
        let first_minutes = session.parked_minutes;
        assert!(first_fee.is_some());

        session.finalize_fee(99.0);
        assert_eq!(session.fee, first_fee);
        assert_eq!(session.parked_minutes, first_minutes);
    }

    #[test]
    fn test_lifecycle() {
        let mut session = VehicleSession::new(PlateId::from("WY 726XE"));
        assert_eq!(session.state, SessionState::Created);

        session.finalize_fee(2.5);
        session.mark_fee_paid();
        assert_eq!(session.state, SessionState::FeeSettled);
        assert!(session.fee_paid);

        session.release();
        assert!(session.is_released());
        assert!(session.exited_at.is_some());
    }

    #[test]
    fn test_to_json() {
        let mut session = VehicleSession::new(PlateId::from("PO 156VN"));
        session.finalize_fee(2.5);
        session.mark_fee_paid();
        session.release();

        let parsed: serde_json::Value = serde_json::from_str(&session.to_json()).unwrap();
        assert_eq!(parsed["sid"], session.sid);
        assert_eq!(parsed["plate"], "PO 156VN");
        assert_eq!(parsed["state"], "released");
        assert_eq!(parsed["fee_paid"], true);
        assert!(parsed["fee"].is_number());
    }

    #[test]
    fn test_uuid_v7_generation() {
        let a = new_uuid_v7();
        let b = new_uuid_v7();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
