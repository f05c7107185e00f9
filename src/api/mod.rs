use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use chrono::Utc;
use log::info;
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

use crate::metrics::MeterMetrics;
use crate::mqtt::{get_app_status, MqttConnectionStatus};
use crate::obis_utils;

pub struct ApiState {
    pub metrics: Arc<MeterMetrics>,
    /// Seconds without a successful read before the exporter reports unhealthy
    pub stale_after: i64,
}

pub struct ApiManager {
    port: u16,
    state: web::Data<ApiState>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub meter_name: String,
    pub mqtt: String,
    pub mqtt_connection_attempts: u64,
    pub mqtt_connected_ago_seconds: Option<u64>,
    pub mqtt_last_message_ago_seconds: Option<u64>,
    pub last_reading_ago_seconds: Option<i64>,
    pub connection_resets: u64,
    pub uptime_seconds: u64,
    pub timestamp: i64,
}

#[derive(Serialize, ToSchema)]
pub struct ReadingInfo {
    pub identifier: String,
    pub name: String,
    pub value: f64,
}

#[derive(Serialize, ToSchema)]
pub struct ReadingsResponse {
    pub meter_name: String,
    pub last_reading: Option<String>,
    pub readings: Vec<ReadingInfo>,
}

#[utoipa::path(get,
    path = "/metrics",
    summary = "Get all metering data in prometheus format",
    responses(
        (status = 200, description = "Returns the current meter data as prometheus text")
    ),
)]
async fn prometheus_metrics(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.metrics.render())
}

#[utoipa::path(get,
    path = "/health",
    summary = "Health check endpoint for container monitoring",
    responses(
        (status = 200, description = "Meter readings are current", body = HealthResponse),
        (status = 503, description = "No recent meter reading")
    ),
)]
async fn health_check(state: web::Data<ApiState>) -> impl Responder {
    let app_status = get_app_status().await;
    let snapshot = state.metrics.snapshot();
    let now = Utc::now();

    let last_reading_ago = snapshot.last_reading.map(|t| (now - t).num_seconds());
    let healthy = last_reading_ago.is_some_and(|ago| ago <= state.stale_after);

    let mqtt_status = match &app_status.mqtt_health.status {
        MqttConnectionStatus::Disabled => "disabled",
        MqttConnectionStatus::Connected => "connected",
        MqttConnectionStatus::Disconnected => "disconnected",
        MqttConnectionStatus::Reconnecting => "reconnecting",
    };

    let response = HealthResponse {
        status: if healthy { "healthy".to_string() } else { "unhealthy".to_string() },
        meter_name: state.metrics.meter_name().to_string(),
        mqtt: mqtt_status.to_string(),
        mqtt_connection_attempts: app_status.mqtt_health.connection_attempts,
        mqtt_connected_ago_seconds: app_status.mqtt_health.seconds_since_connected(),
        mqtt_last_message_ago_seconds: app_status.mqtt_health.seconds_since_message(),
        last_reading_ago_seconds: last_reading_ago,
        connection_resets: snapshot.connection_resets,
        uptime_seconds: app_status.uptime_seconds(),
        timestamp: now.timestamp(),
    };

    if healthy {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

#[utoipa::path(get,
    path = "/api/v1/readings",
    summary = "Get the readings of the last successful cycle",
    responses(
        (status = 200, description = "Current readings", body = ReadingsResponse)
    ),
)]
async fn get_readings(state: web::Data<ApiState>) -> impl Responder {
    let snapshot = state.metrics.snapshot();

    let readings = snapshot
        .readings
        .iter()
        .map(|(id, value)| ReadingInfo {
            identifier: id.clone(),
            name: obis_utils::display_name(id),
            value: *value,
        })
        .collect();

    HttpResponse::Ok().json(ReadingsResponse {
        meter_name: state.metrics.meter_name().to_string(),
        last_reading: snapshot.last_reading.map(|t| t.to_rfc3339()),
        readings,
    })
}

#[derive(OpenApi)]
#[openapi(
    info(description = "powermeter-exporter API description"),
    paths(prometheus_metrics, health_check, get_readings),
    components(schemas(HealthResponse, ReadingsResponse, ReadingInfo))
)]
struct ApiDoc;

async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(ApiDoc::openapi())
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(prometheus_metrics))
        .route("/health", web::get().to(health_check))
        .route("/api/v1/readings", web::get().to(get_readings))
        .route("/api/v1/openapi.json", web::get().to(openapi_json));
}

/// Seconds without a successful read before `/health` reports unhealthy,
/// three missed intervals
pub fn stale_after(interval_secs: u64) -> i64 {
    let secs = interval_secs.max(1).saturating_mul(3);
    i64::try_from(secs).unwrap_or(i64::MAX)
}

impl ApiManager {
    pub fn new(port: u16, metrics: Arc<MeterMetrics>, stale_after: i64) -> Self {
        return ApiManager {
            port,
            state: web::Data::new(ApiState { metrics, stale_after }),
        };
    }

    pub async fn start_thread(&self) -> std::io::Result<()> {
        info!("Serving metrics on port {}", self.port);

        let state = self.state.clone();
        let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
            .bind(("0.0.0.0", self.port))?
            .run();
        server.await
    }
}
