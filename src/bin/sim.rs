//! Parkgate simulation - full gate cycles against in-memory hardware
//!
//! Drives a scripted vehicle through the entrance lane, pays its fee at a
//! simulated kiosk, then drives it out through the exit lane (including one
//! denied attempt while the fee is unpaid). Useful for exercising the whole
//! control path without a serial bus, camera, or broker.
//!
//! Usage:
//!   cargo run --bin sim
//!   cargo run --bin sim -- --config config/sim.toml   # e.g. shorter dwell

use clap::Parser;
use parkgate::domain::types::{BarrierState, LaneRole, PlateId, SensorLocation};
use parkgate::infra::{Config, Metrics};
use parkgate::io::{ScriptedPlateReader, SimulatedLane};
use parkgate::services::{
    BarrierActuator, GateController, InMemorySessionStore, SensorArray, SessionStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sim")]
#[command(about = "Parkgate simulation against in-memory hardware")]
struct Args {
    /// Optional config file (defaults apply when missing)
    #[arg(short, long, default_value = "config/sim.toml")]
    config: String,

    /// Plate the scripted vehicle carries
    #[arg(long, default_value = "PO 156VN")]
    plate: String,
}

/// One simulated lane: hardware, reader, controller
struct SimLane {
    hardware: Arc<SimulatedLane>,
    reader: Arc<ScriptedPlateReader>,
    controller: GateController,
}

fn build_sim_lane(
    role: LaneRole,
    config: &Config,
    sessions: Arc<dyn SessionStore>,
    metrics: Arc<Metrics>,
) -> SimLane {
    let hardware = Arc::new(SimulatedLane::new());
    let reader = Arc::new(ScriptedPlateReader::new());
    let sensors = Arc::new(SensorArray::new(hardware.clone(), metrics.clone()));
    let barrier = BarrierActuator::new(
        role,
        config,
        hardware.clone(),
        sensors.clone(),
        metrics.clone(),
        None,
    );
    let controller =
        GateController::new(role, sensors, barrier, reader.clone(), sessions, metrics, None);
    SimLane { hardware, reader, controller }
}

impl SimLane {
    /// Drive one vehicle through the barrier: approach, admission, pass
    /// under, clear the bar, wait out the dwell, commit.
    async fn run_passage(&mut self, plate: &PlateId, dwell: Duration) {
        self.reader.set_plate(Some(plate.clone()));

        self.hardware.set_present(SensorLocation::BeforeBar, true);
        self.controller.tick().await;
        info!(
            state = %self.controller.barrier().state().as_str(),
            position = %self.controller.barrier().position(),
            "vehicle_at_approach"
        );

        if self.controller.barrier().state() != BarrierState::Open {
            return;
        }

        self.hardware.set_present(SensorLocation::BeforeBar, false);
        self.hardware.set_present(SensorLocation::UnderBar, true);
        self.controller.tick().await;
        info!(position = %self.controller.barrier().position(), "vehicle_under_bar");

        self.hardware.set_present(SensorLocation::UnderBar, false);
        self.hardware.set_present(SensorLocation::BehindBar, true);
        info!(dwell_ms = %dwell.as_millis(), "waiting_out_dwell");
        tokio::time::sleep(dwell).await;
        self.controller.tick().await;
        info!(
            state = %self.controller.barrier().state().as_str(),
            position = %self.controller.barrier().position(),
            "vehicle_cleared_bar"
        );

        self.hardware.set_present(SensorLocation::BehindBar, false);
        self.controller.tick().await;
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    let plate = PlateId(args.plate);
    let dwell = Duration::from_secs(config.min_dwell_secs());

    let metrics = Arc::new(Metrics::new());
    let store: Arc<dyn SessionStore> =
        Arc::new(InMemorySessionStore::new(&config, metrics.clone(), None, None));

    let mut entrance =
        build_sim_lane(LaneRole::Entrance, &config, store.clone(), metrics.clone());
    let mut exit = build_sim_lane(LaneRole::Exit, &config, store.clone(), metrics.clone());

    info!(plate = %plate, min_dwell_secs = %config.min_dwell_secs(), "sim_started");

    // Empty-lane tick: nothing happens
    entrance.controller.tick().await;
    info!(parked = %store.parked_count().await, "empty_lane_tick_done");

    // Entrance passage
    info!("--- entrance cycle ---");
    entrance.run_passage(&plate, dwell).await;
    info!(parked = %store.parked_count().await, "entrance_cycle_done");

    // Exit attempt with the fee unpaid: barrier must stay closed
    info!("--- exit attempt, fee unpaid ---");
    exit.reader.set_plate(Some(plate.clone()));
    exit.hardware.set_present(SensorLocation::BeforeBar, true);
    exit.controller.tick().await;
    info!(
        state = %exit.controller.barrier().state().as_str(),
        "exit_denied_while_unpaid"
    );
    exit.hardware.set_present(SensorLocation::BeforeBar, false);
    exit.controller.tick().await;

    // Kiosk flow: bill the stay, take payment
    info!("--- kiosk payment ---");
    store.finalize_fee(&plate).await;
    store.mark_fee_paid(&plate).await;

    // Exit passage
    info!("--- exit cycle ---");
    exit.run_passage(&plate, dwell).await;
    info!(parked = %store.parked_count().await, "exit_cycle_done");

    metrics.report().log();
    info!("sim_finished");
}
