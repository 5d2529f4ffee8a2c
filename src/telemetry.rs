//! Telemetry ingest reducer
//!
//! Folds `esp32/...` broker messages into the light table and the
//! light-sensor series. Payloads are fully decoded before anything is
//! touched, so a message is either applied completely or not at all.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

use crate::config::RangePolicy;
use crate::error::IngestError;
use crate::models::{LightPayload, LightState, SensorPayload, SensorSample};
use crate::topics::{self, TopicKind};
use crate::validation::check_light_level;

/// Number of samples the chart shows
pub const WINDOW_SIZE: usize = 10;

/// Fixed-size light table, ids `1..=len`
#[derive(Debug, Clone, PartialEq)]
pub struct Lights {
    lights: Vec<LightState>,
}

impl Lights {
    pub fn from_names(names: &[String]) -> Self {
        Self {
            lights: names
                .iter()
                .zip(1u32..)
                .map(|(name, id)| LightState::new(id, name.as_str()))
                .collect(),
        }
    }

    fn index(&self, id: u32) -> Option<usize> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        (index < self.lights.len()).then_some(index)
    }

    pub fn get(&self, id: u32) -> Option<&LightState> {
        self.index(id).map(|i| &self.lights[i])
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut LightState> {
        self.index(id).map(move |i| &mut self.lights[i])
    }

    pub fn as_slice(&self) -> &[LightState] {
        &self.lights
    }

    /// Flip one light's status, returning the new status.
    ///
    /// Local display state only; publishing the matching command is the
    /// caller's business.
    pub fn toggle(&mut self, id: u32) -> Option<bool> {
        let light = self.get_mut(id)?;
        light.status = !light.status;
        Some(light.status)
    }

    /// Merge a decoded light payload into the matching light.
    ///
    /// `status` always wins; the other fields only overwrite when the
    /// payload carries a truthy value (non-zero number, non-empty string).
    fn merge(&mut self, id: u32, payload: LightPayload) -> Option<&LightState> {
        let light = self.get_mut(id)?;

        light.status = payload.status.is_on();
        if let Some(brightness) = truthy_number(payload.brightness) {
            light.brightness = brightness;
        }
        if let Some(intensity) = truthy_number(payload.light_intensity) {
            light.light_intensity = intensity;
        }
        if let Some(motion) = payload.motion_status.filter(|s| !s.is_empty()) {
            light.motion_status = motion;
        }

        Some(&*light)
    }
}

fn truthy_number(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

/// Light-sensor samples: full history plus the chart window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSeries {
    history: Vec<SensorSample>,
    window: VecDeque<SensorSample>,
}

impl SensorSeries {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            window: VecDeque::with_capacity(WINDOW_SIZE + 1),
        }
    }

    pub fn push(&mut self, sample: SensorSample) {
        self.history.push(sample.clone());
        self.window.push_back(sample);
        while self.window.len() > WINDOW_SIZE {
            self.window.pop_front();
        }
    }

    pub fn history(&self) -> &[SensorSample] {
        &self.history
    }

    /// Most recent samples, oldest first
    pub fn window(&self) -> impl Iterator<Item = &SensorSample> {
        self.window.iter()
    }

    pub fn latest(&self) -> Option<&SensorSample> {
        self.window.back()
    }
}

/// Result of applying one message
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    SampleRecorded(SensorSample),
    LightUpdated(LightState),
    /// Well-formed message for a light that does not exist
    Ignored,
}

/// Lights and sensor series, reduced from `esp32/...` traffic
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryState {
    pub lights: Lights,
    pub series: SensorSeries,
    range_policy: RangePolicy,
}

impl TelemetryState {
    pub fn new(lights: Lights, range_policy: RangePolicy) -> Self {
        Self {
            lights,
            series: SensorSeries::new(),
            range_policy,
        }
    }

    /// Apply one inbound message received at `now`.
    ///
    /// On error nothing has been modified.
    pub fn apply(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Outcome, IngestError> {
        match topics::classify(topic) {
            Some(TopicKind::Sensor) => {
                let decoded: SensorPayload = serde_json::from_slice(payload)
                    .map_err(|e| IngestError::malformed(topic, e))?;
                let value = check_light_level(decoded.light, self.range_policy)?;

                let sample = SensorSample::new(value, now);
                self.series.push(sample.clone());

                debug!(value = value, history = self.series.history().len(), "Sensor sample recorded");
                Ok(Outcome::SampleRecorded(sample))
            }
            Some(kind @ (TopicKind::Light(_) | TopicKind::UnknownLight)) => {
                let decoded: LightPayload = serde_json::from_slice(payload)
                    .map_err(|e| IngestError::malformed(topic, e))?;

                let id = match kind {
                    TopicKind::Light(id) => Some(id),
                    _ => None,
                };
                match id.and_then(|id| self.lights.merge(id, decoded)) {
                    Some(light) => {
                        debug!(light_id = light.id, status = light.status, "Light state merged");
                        Ok(Outcome::LightUpdated(light.clone()))
                    }
                    None => {
                        debug!(topic = %topic, "Message for unknown light ignored");
                        Ok(Outcome::Ignored)
                    }
                }
            }
            _ => Err(IngestError::UnroutableTopic(topic.to_string())),
        }
    }

    /// Record a sample that did not come from the broker (synthetic ticker).
    pub fn record_sample(&mut self, value: f64, now: DateTime<Utc>) -> Result<SensorSample, IngestError> {
        let value = check_light_level(value, self.range_policy)?;
        let sample = SensorSample::new(value, now);
        self.series.push(sample.clone());
        Ok(sample)
    }
}
