//! Input validation module
//!
//! Range checks for light-sensor readings and validation for API inputs.

use crate::config::RangePolicy;
use crate::error::{AppError, AppResult, IngestError};
use crate::models::{DefaultDuration, IngestRequest};
use tracing::{debug, warn};
use validator::{Validate, ValidationErrors};

/// Sensor data validation constraints
pub struct SensorConstraints;

impl SensorConstraints {
    /// Range the light chart is drawn for
    pub const LIGHT_MIN: f64 = 0.0;
    pub const LIGHT_MAX: f64 = 100.0;
}

/// Apply the configured range policy to a light-sensor reading.
///
/// Returns the value to store. Non-finite readings are rejected regardless
/// of policy.
pub fn check_light_level(value: f64, policy: RangePolicy) -> Result<f64, IngestError> {
    if !value.is_finite() {
        return Err(IngestError::OutOfRange {
            value,
            min: SensorConstraints::LIGHT_MIN,
            max: SensorConstraints::LIGHT_MAX,
        });
    }

    if (SensorConstraints::LIGHT_MIN..=SensorConstraints::LIGHT_MAX).contains(&value) {
        return Ok(value);
    }

    warn!(
        value = value,
        policy = ?policy,
        "Light sensor reading outside chart range"
    );

    match policy {
        RangePolicy::Pass => Ok(value),
        RangePolicy::Clamp => Ok(value.clamp(SensorConstraints::LIGHT_MIN, SensorConstraints::LIGHT_MAX)),
        RangePolicy::Reject => Err(IngestError::OutOfRange {
            value,
            min: SensorConstraints::LIGHT_MIN,
            max: SensorConstraints::LIGHT_MAX,
        }),
    }
}

fn error_messages(validation_errors: &ValidationErrors) -> Vec<String> {
    validation_errors
        .field_errors()
        .iter()
        .map(|(field, errors)| {
            let msgs: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.message.as_ref().map(|c| c.as_ref()))
                .collect();
            format!("{}: {}", field, msgs.join(", "))
        })
        .collect()
}

/// Validate an injected broker message
pub fn validate_ingest_request(input: &IngestRequest) -> AppResult<()> {
    if let Err(validation_errors) = input.validate() {
        let error_messages = error_messages(&validation_errors);
        warn!(errors = ?error_messages, "Ingest request validation failed");
        return Err(AppError::ValidationError(error_messages.join("; ")));
    }

    if input.topic.contains(['+', '#']) {
        return Err(AppError::ValidationError(
            "topic: wildcards are not allowed in a published topic".to_string(),
        ));
    }

    debug!(topic = %input.topic, "Ingest request validation passed");
    Ok(())
}

/// Validate a new default lighting time
pub fn validate_default_duration(input: &DefaultDuration) -> AppResult<()> {
    if let Err(validation_errors) = input.validate() {
        let error_messages = error_messages(&validation_errors);
        warn!(errors = ?error_messages, "Default lighting time validation failed");
        return Err(AppError::ValidationError(error_messages.join("; ")));
    }
    Ok(())
}

/// Validate pagination parameters
pub fn validate_pagination(page: Option<u32>, limit: Option<u32>) -> AppResult<(u32, u32)> {
    let page = page.unwrap_or(1);
    let limit = limit.unwrap_or(100);

    if page == 0 {
        return Err(AppError::ValidationError(
            "Page number must be greater than 0".to_string(),
        ));
    }

    if limit == 0 || limit > 1000 {
        return Err(AppError::ValidationError(
            "Limit must be between 1 and 1000".to_string(),
        ));
    }

    Ok((page, limit))
}
