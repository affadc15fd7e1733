//! Prometheus metrics HTTP endpoint
//!
//! Exposes gate metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_tick_metrics(&mut output, site_id, &summary);
    write_lane_metrics(&mut output, site_id, &summary);
    write_barrier_metrics(&mut output, site_id, &summary);
    write_session_metrics(&mut output, site_id, &summary);

    output
}

fn write_tick_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parkgate_ticks_total",
        "Total controller ticks run",
        MetricType::Counter,
        site,
        summary.ticks_total,
    );
    let _ = writeln!(output, "# HELP parkgate_ticks_per_sec Controller ticks per second");
    let _ = writeln!(output, "# TYPE parkgate_ticks_per_sec gauge");
    let _ =
        writeln!(output, "parkgate_ticks_per_sec{{site=\"{site}\"}} {:.2}", summary.ticks_per_sec);

    write_histogram(
        output,
        "parkgate_tick_latency_us",
        "Tick processing latency in microseconds",
        site,
        &summary.tick_lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_tick_latency_us,
    );
    write_metric(
        output,
        "parkgate_tick_latency_p99_us",
        "99th percentile tick latency",
        MetricType::Gauge,
        site,
        summary.tick_lat_p99_us,
    );
}

fn write_lane_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parkgate_sensor_read_failures_total",
        "Failed hardware sensor reads",
        MetricType::Counter,
        site,
        summary.sensor_read_failures,
    );
    write_metric(
        output,
        "parkgate_capture_failures_total",
        "Failed camera captures",
        MetricType::Counter,
        site,
        summary.capture_failures,
    );
    write_metric(
        output,
        "parkgate_recognitions_total",
        "Plate recognition attempts",
        MetricType::Counter,
        site,
        summary.recognitions_total,
    );
    write_metric(
        output,
        "parkgate_recognition_misses_total",
        "Recognition attempts that found no plate",
        MetricType::Counter,
        site,
        summary.recognition_misses,
    );
    write_metric(
        output,
        "parkgate_admissions_granted_total",
        "Admissions that opened the barrier",
        MetricType::Counter,
        site,
        summary.admissions_granted,
    );
    write_metric(
        output,
        "parkgate_admissions_denied_total",
        "Admissions refused (no plate or fee unpaid)",
        MetricType::Counter,
        site,
        summary.admissions_denied,
    );
}

fn write_barrier_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parkgate_barrier_opens_total",
        "Completed opening sweeps",
        MetricType::Counter,
        site,
        summary.barrier_opens,
    );
    write_metric(
        output,
        "parkgate_barrier_closes_total",
        "Completed closing sweeps",
        MetricType::Counter,
        site,
        summary.barrier_closes,
    );
    write_metric(
        output,
        "parkgate_close_obstructions_total",
        "Closing sweeps aborted on a persistent obstruction",
        MetricType::Counter,
        site,
        summary.close_obstructions,
    );
    write_metric(
        output,
        "parkgate_entrance_barrier_state",
        "Entrance barrier state (0=closed, 1=open)",
        MetricType::Gauge,
        site,
        summary.entrance_barrier_state,
    );
    write_metric(
        output,
        "parkgate_exit_barrier_state",
        "Exit barrier state (0=closed, 1=open)",
        MetricType::Gauge,
        site,
        summary.exit_barrier_state,
    );
}

fn write_session_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parkgate_entries_total",
        "Entry records committed",
        MetricType::Counter,
        site,
        summary.entries_recorded,
    );
    write_metric(
        output,
        "parkgate_exits_total",
        "Exit records committed",
        MetricType::Counter,
        site,
        summary.exits_recorded,
    );
    write_metric(
        output,
        "parkgate_vehicles_parked",
        "Currently parked vehicles",
        MetricType::Gauge,
        site,
        summary.vehicles_parked,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BarrierState, LaneRole};

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_tick(150);
        metrics.record_tick(250);
        metrics.record_admission(true);
        metrics.record_barrier_open();
        metrics.set_barrier_state(LaneRole::Entrance, BarrierState::Open);
        metrics.set_vehicles_parked(12);

        let output = format_prometheus_metrics(&metrics, "p1-north");

        assert!(output.contains("parkgate_ticks_total{site=\"p1-north\"} 2"));
        assert!(output.contains("parkgate_tick_latency_us_bucket{site=\"p1-north\""));
        assert!(output.contains("parkgate_admissions_granted_total{site=\"p1-north\"} 1"));
        assert!(output.contains("parkgate_entrance_barrier_state{site=\"p1-north\"} 1"));
        assert!(output.contains("parkgate_vehicles_parked{site=\"p1-north\"} 12"));
    }
}
