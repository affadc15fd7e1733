//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::session::{epoch_ms, VehicleSession};
use crate::infra::metrics::MetricsSummary;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Released session for persistence downstream
    Session(SessionPayload),
    /// Live lane event for real-time display
    LaneEvent(LaneEventPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for released sessions
#[derive(Debug, Serialize)]
pub struct SessionPayload {
    pub json: String,
}

/// Payload for live lane events (admissions, barrier transitions, commits)
#[derive(Debug, Clone, Serialize)]
pub struct LaneEventPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Lane (entrance/exit)
    pub lane: String,
    /// Event type (admission_granted, admission_denied, barrier_opened,
    /// barrier_closed, close_obstructed, entry_recorded, exit_recorded)
    pub t: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Plate involved, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
    /// Barrier position in degrees at the time of the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u8>,
    /// Additional detail (e.g., denial reason)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LaneEventPayload {
    pub fn new(lane: &str, t: &str) -> Self {
        Self {
            site: None,
            lane: lane.to_string(),
            t: t.to_string(),
            ts: epoch_ms(),
            plate: None,
            position: None,
            detail: None,
        }
    }

    pub fn with_plate(mut self, plate: &str) -> Self {
        self.plate = Some(plate.to_string());
        self
    }

    pub fn with_position(mut self, position: u8) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// Payload for metrics snapshots
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    #[serde(flatten)]
    pub summary: MetricsSummary,
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send a released session for publishing
    pub fn send_session(&self, session: &VehicleSession) {
        let payload = SessionPayload { json: session.to_json() };
        // Use try_send to avoid blocking - drop if channel full
        let _ = self.tx.try_send(EgressMessage::Session(payload));
    }

    /// Send a lane event for live display
    /// Injects site_id into the payload
    pub fn send_lane_event(&self, mut payload: LaneEventPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::LaneEvent(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload =
            MetricsPayload { site: self.site_id.clone(), ts: epoch_ms(), summary };
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
