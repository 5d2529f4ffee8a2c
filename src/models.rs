//! Data models for dashboard state and broker payloads
//!
//! Defines the core data structures used throughout the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

/// Display format of sample timestamps on the chart axis
const TIME_LABEL_FORMAT: &str = "%H:%M:%S";

/// State of one street light as shown on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightState {
    pub id: u32,
    pub name: String,
    pub status: bool,
    pub brightness: f64,
    pub light_intensity: f64,
    pub motion_status: String,
}

impl LightState {
    /// A light as it is before any message arrived: off, no readings
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: false,
            brightness: 0.0,
            light_intensity: 0.0,
            motion_status: String::new(),
        }
    }
}

/// One light-sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Receipt time
    pub timestamp: DateTime<Utc>,
    /// Chart label for `timestamp`
    pub time: String,
    pub value: f64,
}

impl SensorSample {
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            time: timestamp.format(TIME_LABEL_FORMAT).to_string(),
            value,
        }
    }
}

/// Last known position (and whatever else it reported) of a tracked device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLocation {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DeviceLocation {
    pub fn latitude(&self) -> Option<f64> {
        self.fields.get("latitude").and_then(Value::as_f64)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.fields.get("longitude").and_then(Value::as_f64)
    }
}

/// `esp32/Light_Data_BH1750` payload
#[derive(Debug, Clone, Deserialize)]
pub struct SensorPayload {
    pub light: f64,
}

/// On/off indicator carried by light payloads and commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchStatus {
    On,
    Off,
}

impl SwitchStatus {
    pub fn is_on(self) -> bool {
        matches!(self, SwitchStatus::On)
    }
}

impl From<bool> for SwitchStatus {
    fn from(on: bool) -> Self {
        if on {
            SwitchStatus::On
        } else {
            SwitchStatus::Off
        }
    }
}

/// `esp32/led_<n>` payload. Every field but `status` is sparse.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightPayload {
    pub status: SwitchStatus,
    #[serde(default)]
    pub brightness: Option<f64>,
    #[serde(default)]
    pub light_intensity: Option<f64>,
    #[serde(default)]
    pub motion_status: Option<String>,
}

/// Command published to `esp32/led_<n>` when a light is toggled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightCommand {
    pub status: SwitchStatus,
}

/// Classification of a recorded fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultKind {
    MalformedPayload,
    UnroutableTopic,
    OutOfRange,
    SubscriptionFailed,
    PublishFailed,
    ConnectionLost,
    GeolocationUnavailable,
}

/// An entry on the user-visible error surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    pub id: Uuid,
    pub kind: FaultKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub at: DateTime<Utc>,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>, topic: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            topic: topic.map(str::to_string),
            at: Utc::now(),
        }
    }
}

/// Broker link status as seen by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disabled,
    Disconnected,
    Connected,
}

/// Input DTO for injecting a broker message over HTTP
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngestRequest {
    #[validate(length(min = 1, max = 256, message = "Topic must be 1 to 256 characters"))]
    pub topic: String,
    /// Raw JSON payload as it would arrive from the broker
    pub payload: Value,
}

/// Default lighting time applied to every light
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct DefaultDuration {
    #[validate(range(min = 1, max = 60, message = "Default lighting time must be 1 to 60 minutes"))]
    pub minutes: u32,
}

/// Whether the map center came from the operator position or the fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Geolocation {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapView {
    pub center: [f64; 2],
    pub geolocation: Geolocation,
    pub devices: Vec<DeviceLocation>,
}

/// Everything a dashboard client renders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub revision: u64,
    pub lights: Vec<LightState>,
    pub window: Vec<SensorSample>,
    pub devices: Vec<DeviceLocation>,
    pub connection: ConnectionStatus,
    pub default_duration_minutes: u32,
    /// Most recent faults, newest first
    pub faults: Vec<Fault>,
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Dashboard state changed
    Snapshot(Snapshot),
    /// Connection acknowledgment
    Connected { client_id: String },
    /// Error message
    Error { message: String },
    /// Heartbeat/ping
    Ping,
    /// Heartbeat/pong response
    Pong,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub broker: ConnectionStatus,
    pub last_sample: Option<DateTime<Utc>>,
}
