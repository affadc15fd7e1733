//! Vehicle session repository
//!
//! The gate core never owns session state: it is handed a `SessionStore`
//! at construction and only triggers entry/exit transitions through it.
//! Both lanes share one store; the store serializes per-plate updates
//! internally, and its commit operations tolerate the duplicate calls the
//! release phase can produce across ticks.

use crate::domain::session::VehicleSession;
use crate::domain::types::PlateId;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress::SessionEgress;
use crate::io::egress_channel::{EgressSender, LaneEventPayload};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Persistence collaborator consumed by the gate controllers and kiosks
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a session for a plate. No-op when the plate already has an
    /// open (un-exited) session.
    async fn record_entry(&self, plate: &PlateId);

    /// Payment status of the plate's open session. False when no session
    /// is found.
    async fn is_fee_paid(&self, plate: &PlateId) -> bool;

    /// Release the plate's open session. No-op when none exists.
    async fn record_exit(&self, plate: &PlateId);

    /// End the billed interval and compute the fee (pay-station flow)
    async fn finalize_fee(&self, plate: &PlateId);

    /// Mark the fee paid (pay-station flow)
    async fn mark_fee_paid(&self, plate: &PlateId);

    /// Whether the plate currently has an open session
    async fn is_parked(&self, plate: &PlateId) -> bool;

    /// Number of open sessions
    async fn parked_count(&self) -> usize;
}

/// In-memory session repository with JSONL + MQTT egress on release
pub struct InMemorySessionStore {
    sessions: Mutex<FxHashMap<String, VehicleSession>>,
    hourly_rate: f64,
    capacity: usize,
    metrics: Arc<Metrics>,
    egress: Option<SessionEgress>,
    events: Option<EgressSender>,
}

impl InMemorySessionStore {
    pub fn new(
        config: &Config,
        metrics: Arc<Metrics>,
        egress: Option<SessionEgress>,
        events: Option<EgressSender>,
    ) -> Self {
        Self {
            sessions: Mutex::new(FxHashMap::default()),
            hourly_rate: config.hourly_rate(),
            capacity: config.capacity(),
            metrics,
            egress,
            events,
        }
    }

    fn emit_lane_event(&self, lane: &str, event: &str, plate: &PlateId) {
        if let Some(ref events) = self.events {
            events.send_lane_event(LaneEventPayload::new(lane, event).with_plate(plate.as_str()));
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn record_entry(&self, plate: &PlateId) {
        let parked = {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(plate.as_str()) {
                // Duplicate commit from the release phase, or a plate that
                // never exited
                info!(plate = %plate, "entry_already_parked");
                return;
            }
            if sessions.len() >= self.capacity {
                // The barrier already admitted the vehicle; refusing the
                // record would only lose it
                warn!(plate = %plate, capacity = %self.capacity, "lot_capacity_exceeded");
            }
            let session = VehicleSession::new(plate.clone());
            info!(plate = %plate, sid = %session.sid, "entry_recorded");
            sessions.insert(plate.as_str().to_string(), session);
            sessions.len()
        };

        self.metrics.record_entry();
        self.metrics.set_vehicles_parked(parked);
        self.emit_lane_event("entrance", "entry_recorded", plate);
    }

    async fn is_fee_paid(&self, plate: &PlateId) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(plate.as_str()) {
            Some(session) => session.fee_paid,
            None => {
                debug!(plate = %plate, "fee_query_unknown_plate");
                false
            }
        }
    }

    async fn record_exit(&self, plate: &PlateId) {
        let (released, parked) = {
            let mut sessions = self.sessions.lock();
            let released = sessions.remove(plate.as_str());
            (released, sessions.len())
        };

        let Some(mut session) = released else {
            // Duplicate commit from the release phase, or an unknown plate
            info!(plate = %plate, "exit_no_open_session");
            return;
        };

        session.release();
        info!(
            plate = %plate,
            sid = %session.sid,
            fee = ?session.fee,
            fee_paid = %session.fee_paid,
            "exit_recorded"
        );

        self.metrics.record_exit();
        self.metrics.set_vehicles_parked(parked);

        if let Some(ref egress) = self.egress {
            egress.write_session(&session);
        }
        if let Some(ref events) = self.events {
            events.send_session(&session);
        }
        self.emit_lane_event("exit", "exit_recorded", plate);
    }

    async fn finalize_fee(&self, plate: &PlateId) {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(plate.as_str()) {
            Some(session) => {
                session.finalize_fee(self.hourly_rate);
                info!(
                    plate = %plate,
                    minutes = ?session.parked_minutes,
                    fee = ?session.fee,
                    "fee_finalized"
                );
            }
            None => warn!(plate = %plate, "fee_finalize_unknown_plate"),
        }
    }

    async fn mark_fee_paid(&self, plate: &PlateId) {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(plate.as_str()) {
            Some(session) => {
                session.mark_fee_paid();
                info!(plate = %plate, "fee_paid");
            }
            None => warn!(plate = %plate, "fee_payment_unknown_plate"),
        }
    }

    async fn is_parked(&self, plate: &PlateId) -> bool {
        self.sessions.lock().contains_key(plate.as_str())
    }

    async fn parked_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemorySessionStore {
        InMemorySessionStore::new(&Config::default(), Arc::new(Metrics::new()), None, None)
    }

    #[tokio::test]
    async fn test_entry_creates_open_session() {
        let store = store();
        let plate = PlateId::from("PO 156VN");

        assert!(!store.is_parked(&plate).await);
        store.record_entry(&plate).await;
        assert!(store.is_parked(&plate).await);
        assert_eq!(store.parked_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_entry_dedupes() {
        let store = store();
        let plate = PlateId::from("PO 156VN");

        store.record_entry(&plate).await;
        store.record_entry(&plate).await;
        store.record_entry(&plate).await;

        assert_eq!(store.parked_count().await, 1);
    }

    #[tokio::test]
    async fn test_fee_unknown_plate_reads_unpaid() {
        let store = store();
        assert!(!store.is_fee_paid(&PlateId::from("ZZ 0000")).await);
    }

    #[tokio::test]
    async fn test_fee_lifecycle() {
        let store = store();
        let plate = PlateId::from("WY 8686W");

        store.record_entry(&plate).await;
        assert!(!store.is_fee_paid(&plate).await);

        store.finalize_fee(&plate).await;
        assert!(!store.is_fee_paid(&plate).await);

        store.mark_fee_paid(&plate).await;
        assert!(store.is_fee_paid(&plate).await);
    }

    #[tokio::test]
    async fn test_exit_releases_and_is_idempotent() {
        let store = store();
        let plate = PlateId::from("WY 726XE");

        store.record_entry(&plate).await;
        store.record_exit(&plate).await;
        assert!(!store.is_parked(&plate).await);
        assert_eq!(store.parked_count().await, 0);

        // Duplicate release from a later tick is a no-op
        store.record_exit(&plate).await;
        assert_eq!(store.parked_count().await, 0);
    }

    #[tokio::test]
    async fn test_exit_unknown_plate_noop() {
        let store = store();
        store.record_exit(&PlateId::from("ZZ 0000")).await;
        assert_eq!(store.parked_count().await, 0);
    }

    #[tokio::test]
    async fn test_fee_updates_on_unknown_plate_are_noops() {
        let store = store();
        let plate = PlateId::from("ZZ 0000");
        store.finalize_fee(&plate).await;
        store.mark_fee_paid(&plate).await;
        assert!(!store.is_fee_paid(&plate).await);
    }

    #[tokio::test]
    async fn test_reentry_after_release() {
        let store = store();
        let plate = PlateId::from("PO 156VN");

        store.record_entry(&plate).await;
        store.mark_fee_paid(&plate).await;
        store.record_exit(&plate).await;

        // A fresh visit starts a fresh, unpaid session
        store.record_entry(&plate).await;
        assert!(store.is_parked(&plate).await);
        assert!(!store.is_fee_paid(&plate).await);
    }
}
