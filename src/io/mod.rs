//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `hal` - hardware traits for presence inputs and the barrier servo
//! - `lane_link` - serial protocol to the per-lane I/O board
//! - `anpr` - camera snapshot + plate recognition HTTP collaborators
//! - `egress` - released-session output to file (JSONL format)
//! - `egress_channel` - typed channel for MQTT egress messages
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `prometheus` - Prometheus metrics HTTP endpoint
//! - `simulator` - in-memory hardware for tests and the sim binary

pub mod anpr;
pub mod egress;
pub mod egress_channel;
pub mod hal;
pub mod lane_link;
pub mod mqtt_egress;
pub mod prometheus;
pub mod simulator;

// Re-export commonly used types
pub use anpr::{AnprClient, PlateReader};
pub use egress::SessionEgress;
pub use egress_channel::{create_egress_channel, EgressSender, LaneEventPayload};
pub use hal::{PresenceInputs, ServoDrive};
pub use lane_link::LaneLink;
pub use mqtt_egress::MqttPublisher;
pub use simulator::{ScriptedPlateReader, SimulatedLane};
