//! HTTP request handlers
//!
//! Implements the REST API the dashboard renders from.

use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{DefaultDuration, Fault, FaultKind, HealthCheck, IngestRequest, SensorSample};
use crate::mqtt::{BrokerLink, PublishError};
use crate::state::{AppState, Applied};
use crate::topics::{light_topic, REFRESH_TOPIC};
use crate::validation::{validate_default_duration, validate_ingest_request, validate_pagination};
use crate::websocket::WsSession;

/// Handler-level settings
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Operator position for the map, `None` when unknown
    pub map_center: Option<(f64, f64)>,
    /// Publish a command to the light when it is toggled
    pub toggle_publish: bool,
}

type SharedState = web::Data<Arc<RwLock<AppState>>>;

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // Health check
            .route("/health", web::get().to(health_check))
            // Lights
            .route("/lights", web::get().to(list_lights))
            .route("/lights/default-duration", web::get().to(get_default_duration))
            .route("/lights/default-duration", web::put().to(set_default_duration))
            .route("/lights/{id}", web::get().to(get_light))
            .route("/lights/{id}/toggle", web::post().to(toggle_light))
            // Light sensor
            .route("/sensor/latest", web::get().to(get_latest_sample))
            .route("/sensor/window", web::get().to(get_sample_window))
            .route("/sensor/history", web::get().to(get_sample_history))
            .route("/sensor/statistics", web::get().to(get_statistics))
            // Device locations
            .route("/devices", web::get().to(list_devices))
            .route("/devices/refresh", web::post().to(refresh_devices))
            .route("/devices/{id}", web::get().to(get_device))
            .route("/map", web::get().to(get_map))
            // Broker message injection and faults
            .route("/messages", web::post().to(ingest_message))
            .route("/faults", web::get().to(list_faults)),
    )
    // WebSocket endpoint
    .route("/ws", web::get().to(websocket_handler));
}

/// Health check endpoint
///
/// GET /api/health
pub async fn health_check(state: SharedState) -> Result<HttpResponse, AppError> {
    let state = state.read().await;

    let health = HealthCheck {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        broker: state.connection(),
        last_sample: state.last_sample_time(),
    };

    Ok(HttpResponse::Ok().json(health))
}

/// GET /api/lights
pub async fn list_lights(state: SharedState) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.lights()))
}

/// GET /api/lights/{id}
pub async fn get_light(
    state: SharedState,
    path: web::Path<u32>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let state = state.read().await;

    state
        .light(id)
        .map(|light| HttpResponse::Ok().json(light))
        .ok_or_else(|| AppError::NotFound(format!("Light {} does not exist", id)))
}

/// Toggle a light
///
/// POST /api/lights/{id}/toggle
///
/// Flips the displayed status and, when enabled, publishes the new status
/// to `esp32/led_<id>`. A failed publish is recorded as a fault but the
/// local flip stands.
pub async fn toggle_light(
    state: SharedState,
    link: web::Data<BrokerLink>,
    settings: web::Data<ApiSettings>,
    path: web::Path<u32>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();

    let light = state
        .write()
        .await
        .toggle_light(id)
        .ok_or_else(|| AppError::NotFound(format!("Light {} does not exist", id)))?;

    info!(light_id = id, status = light.status, "Light toggled");

    if settings.toggle_publish && link.is_enabled() {
        if let Err(e) = link.send_light_command(id, light.status) {
            warn!(light_id = id, error = %e, "Light command not published");
            state.write().await.record_fault(Fault::new(
                FaultKind::PublishFailed,
                e.to_string(),
                Some(&light_topic(id)),
            ));
        }
    }

    Ok(HttpResponse::Ok().json(light))
}

/// GET /api/lights/default-duration
pub async fn get_default_duration(state: SharedState) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(DefaultDuration {
        minutes: state.default_duration(),
    }))
}

/// Set the default lighting time for all lights
///
/// PUT /api/lights/default-duration
pub async fn set_default_duration(
    state: SharedState,
    body: web::Json<DefaultDuration>,
) -> Result<HttpResponse, AppError> {
    validate_default_duration(&body)?;

    state.write().await.set_default_duration(body.minutes);

    Ok(HttpResponse::Ok().json(body.into_inner()))
}

/// Get latest sensor sample
///
/// GET /api/sensor/latest
pub async fn get_latest_sample(state: SharedState) -> Result<HttpResponse, AppError> {
    let state = state.read().await;

    match state.latest_sample() {
        Some(sample) => Ok(HttpResponse::Ok().json(sample)),
        None => Err(AppError::NotFound("No sensor samples available".to_string())),
    }
}

/// Chart data: the most recent samples, oldest first
///
/// GET /api/sensor/window
pub async fn get_sample_window(state: SharedState) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.window()))
}

/// Query parameters for sample history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Get sample history, oldest first
///
/// GET /api/sensor/history?page=1&limit=100
pub async fn get_sample_history(
    state: SharedState,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let (page, limit) = validate_pagination(query.page, query.limit)?;

    let state = state.read().await;
    let samples: &[SensorSample] = state.history();

    // Apply pagination
    let total = samples.len();
    let start = ((page - 1) as usize).saturating_mul(limit as usize);
    let end = start.saturating_add(limit as usize).min(total);

    let paginated: Vec<&SensorSample> = if start < total {
        samples[start..end].iter().collect()
    } else {
        Vec::new()
    };

    Ok(HttpResponse::Ok().json(PaginatedResponse {
        data: paginated,
        page,
        limit,
        total: total as u32,
        total_pages: ((total as f64) / (limit as f64)).ceil() as u32,
    }))
}

#[derive(Serialize)]
struct PaginatedResponse<T> {
    data: Vec<T>,
    page: u32,
    limit: u32,
    total: u32,
    total_pages: u32,
}

/// Get sample statistics
///
/// GET /api/sensor/statistics
pub async fn get_statistics(state: SharedState) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.statistics()))
}

/// GET /api/devices
pub async fn list_devices(state: SharedState) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.devices()))
}

/// GET /api/devices/{id}
pub async fn get_device(
    state: SharedState,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let state = state.read().await;

    state
        .device(&id)
        .map(|device| HttpResponse::Ok().json(device))
        .ok_or_else(|| AppError::NotFound(format!("Device {} has not reported", id)))
}

/// Ask devices to re-announce their location
///
/// POST /api/devices/refresh
///
/// Accepted, not completed: the registry changes when devices answer.
pub async fn refresh_devices(
    state: SharedState,
    link: web::Data<BrokerLink>,
) -> Result<HttpResponse, AppError> {
    match link.request_refresh() {
        Ok(()) => {}
        Err(PublishError::Disabled) => {
            return Err(AppError::Unavailable(
                "Broker connection is disabled".to_string(),
            ))
        }
        Err(PublishError::Client(e)) => {
            warn!(error = %e, "Refresh request not published");
            state.write().await.record_fault(Fault::new(
                FaultKind::PublishFailed,
                e.to_string(),
                Some(REFRESH_TOPIC),
            ));
            return Err(AppError::Unavailable(
                "Broker is not accepting requests".to_string(),
            ));
        }
        Err(e @ PublishError::Encode(_)) => return Err(AppError::InternalError(e.to_string())),
    }

    info!("Device location refresh requested");
    Ok(HttpResponse::Accepted().json(RefreshResponse { requested: true }))
}

#[derive(Serialize)]
struct RefreshResponse {
    requested: bool,
}

/// Map center and device markers
///
/// GET /api/map
pub async fn get_map(
    state: SharedState,
    settings: web::Data<ApiSettings>,
) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.map_view(settings.map_center)))
}

/// Inject a broker message
///
/// POST /api/messages
///
/// Runs the message through the same dispatch as broker traffic. Useful
/// for bridges without MQTT and for local testing.
pub async fn ingest_message(
    state: SharedState,
    body: web::Json<IngestRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    validate_ingest_request(&body)?;

    let payload = serde_json::to_vec(&body.payload)
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let applied = state
        .write()
        .await
        .ingest(&body.topic, &payload, Utc::now())?;

    info!(
        correlation_id = %correlation_id,
        topic = %body.topic,
        "Injected message applied"
    );

    Ok(HttpResponse::Accepted().json(IngestResponse {
        applied: !matches!(
            applied,
            Applied::Telemetry(crate::telemetry::Outcome::Ignored)
        ),
        correlation_id,
    }))
}

#[derive(Serialize)]
struct IngestResponse {
    /// False when the message was well-formed but addressed an unknown light
    applied: bool,
    correlation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FaultQuery {
    pub limit: Option<usize>,
}

/// Recent faults, newest first
///
/// GET /api/faults?limit=20
pub async fn list_faults(
    state: SharedState,
    query: web::Query<FaultQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = query.limit.unwrap_or(20).min(100);
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.recent_faults(limit)))
}

/// WebSocket upgrade handler
///
/// GET /ws
///
/// The session registers itself once the upgrade has succeeded.
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: SharedState,
) -> Result<HttpResponse, actix_web::Error> {
    let client_id = Uuid::new_v4().to_string();

    info!(client_id = %client_id, "WebSocket connection request");

    let ws_session = WsSession::new(client_id, state.get_ref().clone());

    actix_web_actors::ws::start(ws_session, &req, stream)
}

/// Extract or generate correlation ID from request headers
fn extract_correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RangePolicy;
    use crate::models::ConnectionStatus;
    use crate::telemetry::Lights;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn new_state() -> Arc<RwLock<AppState>> {
        let names = vec!["Light 1".to_string(), "Light 2".to_string()];
        Arc::new(RwLock::new(AppState::new(
            Lights::from_names(&names),
            RangePolicy::Pass,
            ConnectionStatus::Disabled,
        )))
    }

    fn api_settings() -> ApiSettings {
        ApiSettings {
            map_center: None,
            toggle_publish: true,
        }
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .app_data(web::Data::new(BrokerLink::disabled()))
                    .app_data(web::Data::new(api_settings()))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = app!(new_state());

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["broker"], "disabled");
    }

    #[actix_web::test]
    async fn test_toggle_light() {
        let state = new_state();
        let app = app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/lights/1/toggle")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["id"], 1);
        assert_eq!(body["status"], true);
        assert!(state.read().await.light(1).unwrap().status);
        // disabled broker: nothing published, nothing to report
        assert!(state.read().await.recent_faults(10).is_empty());
    }

    #[actix_web::test]
    async fn test_toggle_unknown_light() {
        let app = app!(new_state());

        let req = test::TestRequest::post()
            .uri("/api/lights/9/toggle")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_ingest_light_message() {
        let state = new_state();
        let app = app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/messages")
            .insert_header(("X-Correlation-ID", "abc-123"))
            .set_json(json!({
                "topic": "esp32/led_1",
                "payload": {"status": "on", "brightness": 75}
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);

        let req = test::TestRequest::get().uri("/api/lights/1").to_request();
        let light: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(light["status"], true);
        assert_eq!(light["brightness"], 75.0);

        let req = test::TestRequest::get().uri("/api/lights/2").to_request();
        let light: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(light["status"], false);
        assert_eq!(light["brightness"], 0.0);
    }

    #[actix_web::test]
    async fn test_ingest_malformed_payload_is_reported() {
        let state = new_state();
        let app = app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/messages")
            .set_json(json!({
                "topic": "esp32/Light_Data_BH1750",
                "payload": {"lux": 12}
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 422);

        let req = test::TestRequest::get().uri("/api/faults").to_request();
        let faults: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(faults[0]["kind"], "MALFORMED_PAYLOAD");
        assert_eq!(faults[0]["topic"], "esp32/Light_Data_BH1750");

        assert!(state.read().await.history().is_empty());
    }

    #[actix_web::test]
    async fn test_ingest_invalid_request() {
        let app = app!(new_state());

        let req = test::TestRequest::post()
            .uri("/api/messages")
            .set_json(json!({"topic": "", "payload": {}}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_sensor_window_and_history() {
        let state = new_state();
        {
            let mut s = state.write().await;
            for i in 0..15 {
                s.record_sample(i as f64, Utc::now()).unwrap();
            }
        }
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/sensor/window").to_request();
        let window: Value = test::call_and_read_body_json(&app, req).await;
        let window = window.as_array().unwrap();
        assert_eq!(window.len(), 10);
        assert_eq!(window[0]["value"], 5.0);
        assert_eq!(window[9]["value"], 14.0);

        let req = test::TestRequest::get()
            .uri("/api/sensor/history?page=2&limit=10")
            .to_request();
        let history: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(history["total"], 15);
        assert_eq!(history["total_pages"], 2);
        assert_eq!(history["data"].as_array().unwrap().len(), 5);
    }

    #[actix_web::test]
    async fn test_get_latest_no_data() {
        let app = app!(new_state());

        let req = test::TestRequest::get()
            .uri("/api/sensor/latest")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_device_upsert_and_map() {
        let app = app!(new_state());

        for payload in [json!({"latitude": 1, "longitude": 2}), json!({"longitude": 3})] {
            let req = test::TestRequest::post()
                .uri("/api/messages")
                .set_json(json!({"topic": "devices/A/location", "payload": payload}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 202);
        }

        let req = test::TestRequest::get().uri("/api/devices").to_request();
        let devices: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(devices, json!([{"id": "A", "latitude": 1, "longitude": 3}]));

        let req = test::TestRequest::get().uri("/api/devices/A").to_request();
        let device: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(device["longitude"], 3);

        let req = test::TestRequest::get().uri("/api/devices/B").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::get().uri("/api/map").to_request();
        let map: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(map["center"], json!([51.505, -0.09]));
        assert_eq!(map["geolocation"], "unavailable");
        assert_eq!(map["devices"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_default_duration() {
        let state = new_state();
        let app = app!(state.clone());

        let req = test::TestRequest::get()
            .uri("/api/lights/default-duration")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"minutes": 10}));

        let req = test::TestRequest::put()
            .uri("/api/lights/default-duration")
            .set_json(json!({"minutes": 45}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["minutes"], 45);
        assert_eq!(state.read().await.default_duration(), 45);
        assert_eq!(state.read().await.snapshot().default_duration_minutes, 45);

        for minutes in [0, 61] {
            let req = test::TestRequest::put()
                .uri("/api/lights/default-duration")
                .set_json(json!({"minutes": minutes}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);
        }
        assert_eq!(state.read().await.default_duration(), 45);
    }

    #[actix_web::test]
    async fn test_refresh_with_full_queue() {
        let state = new_state();
        let (client, _eventloop) = rumqttc::AsyncClient::new(
            rumqttc::MqttOptions::new("streetlight-test", "localhost", 1883),
            1,
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .app_data(web::Data::new(BrokerLink::new(client)))
                .app_data(web::Data::new(api_settings()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/devices/refresh")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 202);

        let req = test::TestRequest::post()
            .uri("/api/devices/refresh")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 503);

        let state = state.read().await;
        let faults = state.recent_faults(10);
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kind, FaultKind::PublishFailed);
        assert_eq!(faults[0].topic.as_deref(), Some("devices/refresh"));
    }

    #[actix_web::test]
    async fn test_failed_upgrade_registers_no_client() {
        let state = new_state();
        let app = app!(state.clone());

        for _ in 0..3 {
            let req = test::TestRequest::get().uri("/ws").to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);
        }

        assert_eq!(state.read().await.client_count(), 0);
    }

    #[actix_web::test]
    async fn test_refresh_without_broker() {
        let app = app!(new_state());

        let req = test::TestRequest::post()
            .uri("/api/devices/refresh")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 503);
    }
}
