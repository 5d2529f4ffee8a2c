//! Street Lighting Dashboard backend
//!
//! Connects to the street-lighting MQTT broker, reconciles light, sensor
//! and device-location traffic into in-memory dashboard state, and serves
//! it over REST and WebSocket.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod error;
mod handlers;
mod models;
mod mqtt;
mod registry;
mod state;
mod synthetic;
mod telemetry;
mod topics;
mod validation;
mod websocket;

use crate::config::Settings;
use crate::handlers::ApiSettings;
use crate::models::{Fault, FaultKind};
use crate::mqtt::{BrokerLink, MqttConnection};
use crate::state::{AppState, DEFAULT_MAP_CENTER};
use crate::synthetic::SyntheticSensor;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenv::dotenv().ok();

    // Logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,streetlight=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    // Load configuration
    let settings = Settings::from_env().context("Failed to load configuration")?;
    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);

    info!("Starting street lighting dashboard backend");
    info!("Binding server to {}", bind_address);

    // Shared application state
    let app_state = Arc::new(RwLock::new(AppState::from_settings(&settings)));

    if settings.map.center.is_none() {
        warn!(
            lat = DEFAULT_MAP_CENTER.0,
            lon = DEFAULT_MAP_CENTER.1,
            "No operator position configured, map falls back to default center"
        );
        app_state.write().await.record_fault(Fault::new(
            FaultKind::GeolocationUnavailable,
            "operator position not configured; using default map center",
            None,
        ));
    }

    // ---------------------------------------------------------------------
    // Broker connection and synthetic sensor, both torn down on shutdown
    // ---------------------------------------------------------------------
    let connection = if settings.mqtt.enabled {
        Some(MqttConnection::start(&settings.mqtt, app_state.clone()))
    } else {
        warn!("Broker connection disabled, only HTTP ingest is available");
        None
    };
    let link = connection
        .as_ref()
        .map(MqttConnection::link)
        .unwrap_or_else(BrokerLink::disabled);

    let ticker = settings
        .sensor
        .synthetic_enabled
        .then(|| SyntheticSensor::new(settings.sensor.synthetic_interval_ms).spawn(app_state.clone()));

    let api_settings = ApiSettings {
        map_center: settings.map.center,
        toggle_publish: settings.lights.toggle_publish,
    };

    // ---------------------------------------------------------------------
    // HTTP + WebSocket server
    // ---------------------------------------------------------------------
    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .app_data(web::Data::new(link.clone()))
            .app_data(web::Data::new(api_settings.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .run();

    let served = server.await;

    // ---------------------------------------------------------------------
    // Teardown
    // ---------------------------------------------------------------------
    if let Some(ticker) = ticker {
        ticker.abort();
    }
    if let Some(connection) = connection {
        connection.shutdown().await;
    }
    info!(
        revision = app_state.read().await.revision(),
        "Street lighting dashboard backend stopped"
    );

    served.context("HTTP server failed")
}
