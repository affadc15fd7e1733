//! Parkgate - automated parking barrier control system
//!
//! Runs one entrance and one exit lane: sensor polling, barrier actuation
//! with dwell and safety interlock, plate recognition, and session
//! commits against the shared repository.
//!
//! Module structure:
//! - `domain/` - Core business types (PlateId, BarrierState, VehicleSession)
//! - `io/` - External interfaces (lane I/O board, ANPR, MQTT egress, metrics endpoint)
//! - `services/` - Business logic (SensorArray, BarrierActuator, GateController)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use parkgate::domain::types::LaneRole;
use parkgate::infra::config::LaneSettings;
use parkgate::infra::{Config, Metrics};
use parkgate::io::{
    create_egress_channel, AnprClient, EgressSender, LaneLink, MqttPublisher, SessionEgress,
};
use parkgate::services::{
    BarrierActuator, ControlLoop, GateController, InMemorySessionStore, SensorArray, SessionStore,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parkgate - automated parking barrier control system
#[derive(Parser, Debug)]
#[command(name = "parkgate", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

/// Wire one lane: serial board, camera/ANPR client, sensor array, barrier,
/// controller, control loop.
fn build_lane(
    role: LaneRole,
    settings: &LaneSettings,
    config: &Config,
    sessions: Arc<dyn SessionStore>,
    metrics: Arc<Metrics>,
    egress: Option<EgressSender>,
) -> anyhow::Result<ControlLoop> {
    let link = Arc::new(LaneLink::open(
        settings,
        config.servo_min_duty_us(),
        config.servo_max_duty_us(),
    )?);
    let reader = Arc::new(AnprClient::new(
        &settings.camera_url,
        &settings.anpr_url,
        config.anpr_min_confidence(),
        config.anpr_timeout_ms(),
    ));

    let sensors = Arc::new(SensorArray::new(link.clone(), metrics.clone()));
    let barrier = BarrierActuator::new(
        role,
        config,
        link,
        sensors.clone(),
        metrics.clone(),
        egress.clone(),
    );
    let controller =
        GateController::new(role, sensors, barrier, reader, sessions, metrics, egress);

    Ok(ControlLoop::new(controller, settings.poll_interval_ms))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full tick visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "parkgate starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        entrance_device = %config.entrance_lane().device,
        exit_device = %config.exit_lane().device,
        min_dwell_secs = %config.min_dwell_secs(),
        capacity = %config.capacity(),
        prometheus_port = %config.prometheus_port(),
        mqtt_egress = %config.mqtt_egress_enabled(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        Some(egress_sender)
    } else {
        None
    };

    // Shared session repository with JSONL egress for released sessions
    let session_egress = SessionEgress::new(config.egress_file());
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(
        &config,
        metrics.clone(),
        Some(session_egress),
        egress_sender.clone(),
    ));

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = parkgate::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter: logs a summary and publishes it over egress
    let reporter_metrics = metrics.clone();
    let reporter_egress = egress_sender.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = reporter_metrics.report();
            summary.log();
            if let Some(ref sender) = reporter_egress {
                sender.send_metrics(summary);
            }
        }
    });

    // Build both lanes and run them as independent tasks
    let entrance = build_lane(
        LaneRole::Entrance,
        config.entrance_lane(),
        &config,
        sessions.clone(),
        metrics.clone(),
        egress_sender.clone(),
    )?;
    let exit = build_lane(
        LaneRole::Exit,
        config.exit_lane(),
        &config,
        sessions.clone(),
        metrics.clone(),
        egress_sender,
    )?;

    let entrance_handle = tokio::spawn(entrance.run(shutdown_rx.clone()));
    let exit_handle = tokio::spawn(exit.run(shutdown_rx));

    // Handle shutdown on Ctrl+C
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    let _ = entrance_handle.await;
    let _ = exit_handle.await;

    info!("parkgate shutdown complete");
    Ok(())
}
