//! Broker topic contract
//!
//! Topic names the dashboard consumes and publishes, and the classifier
//! that routes an inbound topic to the reducer responsible for it.

/// Light-sensor (BH1750) readings
pub const SENSOR_TOPIC: &str = "esp32/Light_Data_BH1750";

/// Per-light topics are `esp32/led_<n>`
pub const LIGHT_TOPIC_PREFIX: &str = "esp32/led_";

/// Outbound request asking devices to re-announce their position
pub const REFRESH_TOPIC: &str = "devices/refresh";
pub const REFRESH_COMMAND: &str = "get location";

const DEVICE_PREFIX: &str = "devices/";
const LOCATION_SUFFIX: &str = "/location";

/// Subscription filters. `led_+` is not a valid wildcard so the whole
/// `esp32/` level is subscribed and narrowed by [`classify`].
pub const SUBSCRIPTIONS: [&str; 2] = ["esp32/+", "devices/+/location"];

/// Where an inbound message belongs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    Sensor,
    Light(u32),
    /// Light topic whose numeric id is too large to name any light
    UnknownLight,
    DeviceLocation(String),
}

/// Classify an inbound topic, `None` when no reducer handles it.
pub fn classify(topic: &str) -> Option<TopicKind> {
    if topic == SENSOR_TOPIC {
        return Some(TopicKind::Sensor);
    }

    if topic.starts_with(LIGHT_TOPIC_PREFIX) {
        // the id is whatever follows the last separator
        let suffix = topic.rsplit('_').next()?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        return Some(suffix.parse().map_or(TopicKind::UnknownLight, TopicKind::Light));
    }

    let device_id = topic
        .strip_prefix(DEVICE_PREFIX)?
        .strip_suffix(LOCATION_SUFFIX)?;
    if device_id.is_empty() || device_id.contains('/') {
        return None;
    }
    Some(TopicKind::DeviceLocation(device_id.to_string()))
}

/// Topic a light listens on for commands
pub fn light_topic(id: u32) -> String {
    format!("{}{}", LIGHT_TOPIC_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_topic() {
        assert_eq!(classify("esp32/Light_Data_BH1750"), Some(TopicKind::Sensor));
        assert_eq!(classify("esp32/Light_Data_BH1750/raw"), None);
    }

    #[test]
    fn test_light_topics() {
        assert_eq!(classify("esp32/led_1"), Some(TopicKind::Light(1)));
        assert_eq!(classify("esp32/led_12"), Some(TopicKind::Light(12)));
        assert_eq!(classify("esp32/led_"), None);
        assert_eq!(classify("esp32/led_x"), None);
        assert_eq!(classify("esp32/led_-1"), None);
        assert_eq!(classify("esp32/led_99999999999"), Some(TopicKind::UnknownLight));
    }

    #[test]
    fn test_device_location_topics() {
        assert_eq!(
            classify("devices/A/location"),
            Some(TopicKind::DeviceLocation("A".to_string()))
        );
        assert_eq!(classify("devices//location"), None);
        assert_eq!(classify("devices/a/b/location"), None);
        assert_eq!(classify("devices/A/status"), None);
        assert_eq!(classify("devices/refresh"), None);
    }

    #[test]
    fn test_unknown_topic() {
        assert_eq!(classify("esp32/temperature"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn test_light_topic_round_trip() {
        assert_eq!(light_topic(3), "esp32/led_3");
        assert_eq!(classify(&light_topic(3)), Some(TopicKind::Light(3)));
    }
}
