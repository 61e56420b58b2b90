//! Inbound Reading Payloads

use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single measurement as published on the sensor topic.
///
/// Wire form: `{"sensor_id": "...", "value": 21.5, "timestamp": "2024-05-01T12:00:00Z"}`.
/// Timestamps with an offset are normalized to UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Decode and validate a raw payload
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let reading: Reading = serde_json::from_slice(payload)?;
        reading.validate()?;
        Ok(reading)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.sensor_id.trim().is_empty() {
            return Err(DecodeError::MissingField("sensor_id"));
        }
        if !self.value.is_finite() {
            return Err(DecodeError::NonFinite {
                field: "value",
                value: self.value,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_decode_valid_payload() {
        let payload = br#"{"sensor_id":"abc","value":21.5,"timestamp":"2024-05-01T12:00:00Z"}"#;
        let reading = Reading::decode(payload).unwrap();

        assert_eq!(reading.sensor_id, "abc");
        assert_eq!(reading.value, 21.5);
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_decode_normalizes_offset() {
        let payload = br#"{"sensor_id":"abc","value":1,"timestamp":"2024-05-01T14:00:00+02:00"}"#;
        let reading = Reading::decode(payload).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_missing_timestamp() {
        let payload = br#"{"sensor_id":"abc","value":1.0}"#;
        assert!(matches!(
            Reading::decode(payload),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_string_value() {
        let payload = br#"{"sensor_id":"abc","value":"hot","timestamp":"2024-05-01T12:00:00Z"}"#;
        assert!(Reading::decode(payload).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_timestamp() {
        let payload = br#"{"sensor_id":"abc","value":1.0,"timestamp":"yesterday"}"#;
        assert!(Reading::decode(payload).is_err());
    }

    #[test]
    fn test_decode_rejects_blank_sensor_id() {
        let payload = br#"{"sensor_id":"  ","value":1.0,"timestamp":"2024-05-01T12:00:00Z"}"#;
        assert!(matches!(
            Reading::decode(payload),
            Err(DecodeError::MissingField("sensor_id"))
        ));
    }

    proptest! {
        #[test]
        fn test_decode_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = Reading::decode(&payload);
        }

        #[test]
        fn test_decode_accepts_any_finite_value(value in -1.0e12f64..1.0e12f64) {
            let payload = format!(
                r#"{{"sensor_id":"s-1","value":{},"timestamp":"2024-05-01T12:00:00Z"}}"#,
                value
            );
            let reading = Reading::decode(payload.as_bytes()).unwrap();
            prop_assert!((reading.value - value).abs() <= f64::EPSILON * value.abs().max(1.0));
        }
    }
}
