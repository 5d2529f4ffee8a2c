//! Application state management
//!
//! Central state container for the dashboard: the reduced telemetry, the
//! device registry, the fault surface, broker link status and WebSocket
//! client registry. Every broker message goes through [`AppState::ingest`],
//! the single reporting boundary for ingest faults.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::config::{RangePolicy, Settings, DEFAULT_LIGHT_DURATION_MINUTES};
use crate::error::IngestError;
use crate::models::{
    ConnectionStatus, DeviceLocation, Fault, FaultKind, Geolocation, LightState, MapView,
    SensorSample, Snapshot,
};
use crate::registry::{DeviceRegistry, Upsert};
use crate::telemetry::{Lights, Outcome, TelemetryState};
use crate::topics::{self, TopicKind};

/// Maximum number of faults kept for the dashboard
const MAX_FAULTS: usize = 100;

/// Faults carried in each WebSocket snapshot
const SNAPSHOT_FAULTS: usize = 10;

/// Map center used when no operator position is configured
pub const DEFAULT_MAP_CENTER: (f64, f64) = (51.505, -0.09);

/// What an ingested message changed
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Telemetry(Outcome),
    Device(Upsert),
}

/// Central application state
#[derive(Debug)]
pub struct AppState {
    telemetry: TelemetryState,
    devices: DeviceRegistry,
    /// Most recent faults, oldest first
    faults: VecDeque<Fault>,
    /// Bumped on every change a dashboard would render
    revision: u64,
    connection: ConnectionStatus,
    /// Default lighting time for all lights, in minutes
    default_duration_minutes: u32,
    /// Application start time
    start_time: DateTime<Utc>,
    /// Connected WebSocket clients
    connected_clients: Vec<String>,
}

impl AppState {
    /// Create new application state
    pub fn new(lights: Lights, range_policy: RangePolicy, connection: ConnectionStatus) -> Self {
        info!(lights = lights.as_slice().len(), "Initializing application state");
        Self {
            telemetry: TelemetryState::new(lights, range_policy),
            devices: DeviceRegistry::new(),
            faults: VecDeque::with_capacity(MAX_FAULTS),
            revision: 0,
            connection,
            default_duration_minutes: DEFAULT_LIGHT_DURATION_MINUTES,
            start_time: Utc::now(),
            connected_clients: Vec::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let connection = if settings.mqtt.enabled {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Disabled
        };
        let mut state = Self::new(
            Lights::from_names(&settings.lights.names),
            settings.sensor.range_policy,
            connection,
        );
        state.default_duration_minutes = settings.lights.default_duration_minutes;
        state
    }

    /// Route one inbound broker message to its reducer.
    ///
    /// Faults are logged and recorded here; the returned error is for
    /// callers that want to answer a request with it.
    pub fn ingest(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Applied, IngestError> {
        let result = match topics::classify(topic) {
            Some(TopicKind::Sensor | TopicKind::Light(_) | TopicKind::UnknownLight) => self
                .telemetry
                .apply(topic, payload, now)
                .map(Applied::Telemetry),
            Some(TopicKind::DeviceLocation(_)) => {
                self.devices.apply(topic, payload).map(Applied::Device)
            }
            None => Err(IngestError::UnroutableTopic(topic.to_string())),
        };

        match &result {
            Ok(Applied::Telemetry(Outcome::Ignored)) => {}
            Ok(applied) => {
                self.revision += 1;
                debug!(topic = %topic, applied = ?applied, revision = self.revision, "Message applied");
            }
            Err(err) => {
                warn!(topic = %topic, error = %err, "Discarding broker message");
                self.record_fault(Fault::new(fault_kind(err), err.to_string(), Some(topic)));
            }
        }

        result
    }

    /// Record a sample produced locally instead of received from the broker
    pub fn record_sample(&mut self, value: f64, now: DateTime<Utc>) -> Result<SensorSample, IngestError> {
        match self.telemetry.record_sample(value, now) {
            Ok(sample) => {
                self.revision += 1;
                Ok(sample)
            }
            Err(err) => {
                warn!(error = %err, "Discarding local sensor sample");
                self.record_fault(Fault::new(fault_kind(&err), err.to_string(), None));
                Err(err)
            }
        }
    }

    /// Flip a light locally, returning its new state
    pub fn toggle_light(&mut self, id: u32) -> Option<LightState> {
        self.telemetry.lights.toggle(id)?;
        self.revision += 1;
        self.telemetry.lights.get(id).cloned()
    }

    pub fn default_duration(&self) -> u32 {
        self.default_duration_minutes
    }

    /// Set the default lighting time. Range checks are the caller's job.
    pub fn set_default_duration(&mut self, minutes: u32) {
        if self.default_duration_minutes != minutes {
            info!(minutes = minutes, "Default lighting time changed");
            self.default_duration_minutes = minutes;
            self.revision += 1;
        }
    }

    pub fn lights(&self) -> &[LightState] {
        self.telemetry.lights.as_slice()
    }

    pub fn light(&self, id: u32) -> Option<&LightState> {
        self.telemetry.lights.get(id)
    }

    /// Get the latest sensor sample
    pub fn latest_sample(&self) -> Option<&SensorSample> {
        self.telemetry.series.latest()
    }

    /// Chart window, oldest first
    pub fn window(&self) -> Vec<SensorSample> {
        self.telemetry.series.window().cloned().collect()
    }

    /// Full sample history, oldest first
    pub fn history(&self) -> &[SensorSample] {
        self.telemetry.series.history()
    }

    pub fn devices(&self) -> &[DeviceLocation] {
        self.devices.devices()
    }

    pub fn device(&self, id: &str) -> Option<&DeviceLocation> {
        self.devices.get(id)
    }

    /// Map center plus markers. `center` is the operator position if known.
    ///
    /// Devices that have not reported both coordinates yet get no marker.
    pub fn map_view(&self, center: Option<(f64, f64)>) -> MapView {
        let ((lat, lon), geolocation) = match center {
            Some(position) => (position, Geolocation::Available),
            None => (DEFAULT_MAP_CENTER, Geolocation::Unavailable),
        };
        MapView {
            center: [lat, lon],
            geolocation,
            devices: self
                .devices
                .devices()
                .iter()
                .filter(|d| d.latitude().is_some() && d.longitude().is_some())
                .cloned()
                .collect(),
        }
    }

    /// Get statistics about the sample history
    pub fn statistics(&self) -> SampleStatistics {
        let history = self.telemetry.series.history();
        if history.is_empty() {
            return SampleStatistics::empty();
        }

        let count = history.len();
        let sum: f64 = history.iter().map(|s| s.value).sum();

        SampleStatistics {
            count,
            avg: sum / count as f64,
            min: history.iter().map(|s| s.value).fold(f64::MAX, f64::min),
            max: history.iter().map(|s| s.value).fold(f64::MIN, f64::max),
        }
    }

    pub fn record_fault(&mut self, fault: Fault) {
        if self.faults.len() >= MAX_FAULTS {
            self.faults.pop_front();
        }
        self.faults.push_back(fault);
        self.revision += 1;
    }

    /// Most recent faults, newest first
    pub fn recent_faults(&self, count: usize) -> Vec<&Fault> {
        self.faults.iter().rev().take(count).collect()
    }

    pub fn set_connection(&mut self, status: ConnectionStatus) {
        if self.connection != status {
            info!(status = ?status, "Broker connection status changed");
            self.connection = status;
            self.revision += 1;
        }
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            revision: self.revision,
            lights: self.lights().to_vec(),
            window: self.window(),
            devices: self.devices().to_vec(),
            connection: self.connection,
            default_duration_minutes: self.default_duration_minutes,
            faults: self
                .recent_faults(SNAPSHOT_FAULTS)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.start_time).num_seconds() as u64
    }

    /// Get the timestamp of the latest sample
    pub fn last_sample_time(&self) -> Option<DateTime<Utc>> {
        self.latest_sample().map(|s| s.timestamp)
    }

    /// Register a new WebSocket client
    pub fn add_client(&mut self, client_id: String) {
        info!(client_id = %client_id, "WebSocket client connected");
        self.connected_clients.push(client_id);
    }

    /// Remove a WebSocket client
    pub fn remove_client(&mut self, client_id: &str) {
        info!(client_id = %client_id, "WebSocket client disconnected");
        self.connected_clients.retain(|id| id != client_id);
    }

    /// Get count of connected clients
    pub fn client_count(&self) -> usize {
        self.connected_clients.len()
    }
}

fn fault_kind(err: &IngestError) -> FaultKind {
    match err {
        IngestError::MalformedPayload { .. } => FaultKind::MalformedPayload,
        IngestError::UnroutableTopic(_) => FaultKind::UnroutableTopic,
        IngestError::OutOfRange { .. } => FaultKind::OutOfRange,
    }
}

/// Statistical summary of the sample history
#[derive(Debug, Clone, serde::Serialize)]
pub struct SampleStatistics {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl SampleStatistics {
    pub fn empty() -> Self {
        Self {
            count: 0,
            avg: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }
}
