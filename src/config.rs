//! Configuration management module
//!
//! Loads and validates environment-based configuration for the HTTP
//! server, the broker connection, the light fleet and the sensor ingest.

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::models::DefaultDuration;

/// Default lighting time for all lights, in minutes
pub const DEFAULT_LIGHT_DURATION_MINUTES: u32 = 10;

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid value for environment variable {0}")]
    ParseError(&'static str),

    #[error("LIGHT_COUNT must be at least 1")]
    NoLights,
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Broker connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct MqttSettings {
    /// When false the service runs without a broker (HTTP ingest only)
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub keep_alive_secs: u64,
    /// Fixed delay before polling the event loop again after a connection error
    pub reconnect_delay_ms: u64,
}

/// Light fleet settings
#[derive(Debug, Clone, Deserialize)]
pub struct LightSettings {
    pub names: Vec<String>,
    /// Publish `esp32/led_<n>` commands when a light is toggled
    pub toggle_publish: bool,
    /// Initial default lighting time, 1 to 60 minutes
    pub default_duration_minutes: u32,
}

/// What to do with light-sensor readings outside [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    Pass,
    Clamp,
    Reject,
}

impl FromStr for RangePolicy {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" => Ok(RangePolicy::Pass),
            "clamp" => Ok(RangePolicy::Clamp),
            "reject" => Ok(RangePolicy::Reject),
            _ => Err(SettingsError::ParseError("SENSOR_RANGE_POLICY")),
        }
    }
}

/// Sensor configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct SensorSettings {
    pub synthetic_enabled: bool,
    /// Interval in milliseconds between synthesized samples
    pub synthetic_interval_ms: u64,
    pub range_policy: RangePolicy,
}

/// Map settings
#[derive(Debug, Clone, Deserialize)]
pub struct MapSettings {
    /// Operator position, `None` when not configured
    pub center: Option<(f64, f64)>,
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub mqtt: MqttSettings,
    pub lights: LightSettings,
    pub sensor: SensorSettings,
    pub map: MapSettings,
}

fn parse_var<T: FromStr>(key: &'static str, default: &str) -> Result<T, SettingsError> {
    env::var(key)
        .unwrap_or_else(|_| default.into())
        .trim()
        .parse()
        .map_err(|_| SettingsError::ParseError(key))
}

/// Unparsable coordinates count as "not configured" so the map falls back
/// to its default center instead of refusing to start.
fn map_center() -> Option<(f64, f64)> {
    let lat = env::var("MAP_CENTER_LAT").ok()?.trim().parse::<f64>().ok()?;
    let lon = env::var("MAP_CENTER_LON").ok()?.trim().parse::<f64>().ok()?;
    if lat.is_finite() && lon.is_finite() {
        Some((lat, lon))
    } else {
        None
    }
}

fn light_names(count: usize) -> Vec<String> {
    let configured: Vec<String> = env::var("LIGHT_NAMES")
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    (1..=count)
        .map(|id| {
            configured
                .get(id - 1)
                .cloned()
                .unwrap_or_else(|| format!("Light {}", id))
        })
        .collect()
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self, SettingsError> {
        let light_count: usize = parse_var("LIGHT_COUNT", "2")?;
        if light_count == 0 {
            return Err(SettingsError::NoLights);
        }

        let default_duration = DefaultDuration {
            minutes: parse_var(
                "LIGHT_DEFAULT_DURATION_MIN",
                &DEFAULT_LIGHT_DURATION_MINUTES.to_string(),
            )?,
        };
        if default_duration.validate().is_err() {
            return Err(SettingsError::ParseError("LIGHT_DEFAULT_DURATION_MIN"));
        }

        Ok(Self {
            server: ServerSettings {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
                port: parse_var("SERVER_PORT", "8080")?,
            },
            mqtt: MqttSettings {
                enabled: parse_var("MQTT_ENABLED", "true")?,
                host: env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".into()),
                port: parse_var("MQTT_PORT", "1883")?,
                client_id: env::var("MQTT_CLIENT_ID")
                    .unwrap_or_else(|_| format!("streetlight-{}", Uuid::new_v4().simple())),
                username: env::var("MQTT_USERNAME").ok(),
                password: env::var("MQTT_PASSWORD").ok(),
                tls: parse_var("MQTT_TLS", "false")?,
                keep_alive_secs: parse_var("MQTT_KEEP_ALIVE_SECS", "30")?,
                reconnect_delay_ms: parse_var("MQTT_RECONNECT_DELAY_MS", "5000")?,
            },
            lights: LightSettings {
                names: light_names(light_count),
                toggle_publish: parse_var("LIGHT_TOGGLE_PUBLISH", "true")?,
                default_duration_minutes: default_duration.minutes,
            },
            sensor: SensorSettings {
                synthetic_enabled: parse_var("SYNTHETIC_SENSOR_ENABLED", "true")?,
                synthetic_interval_ms: parse_var("SYNTHETIC_INTERVAL_MS", "60000")?,
                range_policy: parse_var("SENSOR_RANGE_POLICY", "pass")?,
            },
            map: MapSettings {
                center: map_center(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests touching them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_settings() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in [
            "SERVER_HOST",
            "SERVER_PORT",
            "MQTT_PORT",
            "LIGHT_COUNT",
            "LIGHT_NAMES",
            "LIGHT_DEFAULT_DURATION_MIN",
            "SYNTHETIC_INTERVAL_MS",
            "SENSOR_RANGE_POLICY",
            "MAP_CENTER_LAT",
            "MAP_CENTER_LON",
        ] {
            env::remove_var(key);
        }

        let settings = Settings::from_env().unwrap();

        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.mqtt.port, 1883);
        assert!(settings.mqtt.client_id.starts_with("streetlight-"));
        assert_eq!(settings.lights.names, vec!["Light 1", "Light 2"]);
        assert_eq!(settings.lights.default_duration_minutes, 10);
        assert_eq!(settings.sensor.synthetic_interval_ms, 60_000);
        assert_eq!(settings.sensor.range_policy, RangePolicy::Pass);
        assert!(settings.map.center.is_none());
    }

    #[test]
    fn test_custom_settings() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("SERVER_PORT", "3000");
        env::set_var("LIGHT_COUNT", "3");
        env::set_var("LIGHT_NAMES", "North, South");
        env::set_var("SENSOR_RANGE_POLICY", "Clamp");
        env::set_var("MAP_CENTER_LAT", "21.03");
        env::set_var("MAP_CENTER_LON", "105.85");

        let settings = Settings::from_env().unwrap();

        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.lights.names, vec!["North", "South", "Light 3"]);
        assert_eq!(settings.sensor.range_policy, RangePolicy::Clamp);
        assert_eq!(settings.map.center, Some((21.03, 105.85)));

        for key in [
            "SERVER_PORT",
            "LIGHT_COUNT",
            "LIGHT_NAMES",
            "SENSOR_RANGE_POLICY",
            "MAP_CENTER_LAT",
            "MAP_CENTER_LON",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap();

        env::set_var("LIGHT_COUNT", "0");
        assert!(matches!(Settings::from_env(), Err(SettingsError::NoLights)));
        env::remove_var("LIGHT_COUNT");

        env::set_var("SENSOR_RANGE_POLICY", "ignore");
        assert!(matches!(
            Settings::from_env(),
            Err(SettingsError::ParseError("SENSOR_RANGE_POLICY"))
        ));
        env::remove_var("SENSOR_RANGE_POLICY");

        for minutes in ["0", "61", "ten"] {
            env::set_var("LIGHT_DEFAULT_DURATION_MIN", minutes);
            assert!(matches!(
                Settings::from_env(),
                Err(SettingsError::ParseError("LIGHT_DEFAULT_DURATION_MIN"))
            ));
        }
        env::remove_var("LIGHT_DEFAULT_DURATION_MIN");
    }

    #[test]
    fn test_unparsable_map_center_falls_back() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("MAP_CENTER_LAT", "north");
        env::set_var("MAP_CENTER_LON", "105.85");

        assert!(map_center().is_none());

        env::remove_var("MAP_CENTER_LAT");
        env::remove_var("MAP_CENTER_LON");
    }
}
