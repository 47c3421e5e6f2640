use serde::Deserialize;
use serde_json::Value;

use crate::geo::Coordinate;
use crate::services::transport_api::StopId;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Vehicle position broadcast by the driver.
    Position(Coordinate),
    /// Server-pushed alert for the rider.
    Notification { title: String, body: String },
    /// A rider changed their boarding status (delivered to drivers).
    CheckIn { subject_id: StopId, is_boarding: bool },
    /// Any frame whose `type` is not recognised.
    Unknown { raw: String },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Location {
        latitude: f64,
        longitude: f64,
    },
    Notification {
        #[serde(default)]
        title: String,
        #[serde(default)]
        body: String,
    },
    StudentCheckIn {
        student_id: StopId,
        is_boarding: bool,
    },
}

const KNOWN_TYPES: &[&str] = &["location", "notification", "student_check_in"];

impl StreamEvent {
    /// Decodes one text frame.
    ///
    /// Invalid JSON, or a known `type` with missing fields, is an error; a
    /// valid JSON value with an unknown or absent `type` is [`StreamEvent::Unknown`].
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;

        let known = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| KNOWN_TYPES.contains(&t));
        if !known {
            return Ok(StreamEvent::Unknown {
                raw: text.to_string(),
            });
        }

        Ok(match serde_json::from_value::<Frame>(value)? {
            Frame::Location {
                latitude,
                longitude,
            } => StreamEvent::Position(Coordinate::new(latitude, longitude)),
            Frame::Notification { title, body } => StreamEvent::Notification { title, body },
            Frame::StudentCheckIn {
                student_id,
                is_boarding,
            } => StreamEvent::CheckIn {
                subject_id: student_id,
                is_boarding,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_location() {
        let ev = StreamEvent::decode(r#"{"type":"location","latitude":12.5,"longitude":77.25}"#)
            .unwrap();
        assert_eq!(ev, StreamEvent::Position(Coordinate::new(12.5, 77.25)));
    }

    #[test]
    fn test_decode_notification_with_missing_body() {
        let ev = StreamEvent::decode(r#"{"type":"notification","title":"Bus is near"}"#).unwrap();
        assert_eq!(
            ev,
            StreamEvent::Notification {
                title: "Bus is near".into(),
                body: String::new()
            }
        );
    }

    #[test]
    fn test_decode_check_in() {
        let ev = StreamEvent::decode(
            r#"{"type":"student_check_in","student_id":42,"is_boarding":false}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            StreamEvent::CheckIn {
                subject_id: 42,
                is_boarding: false
            }
        );
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let raw = r#"{"type":"eta_update","minutes":4}"#;
        assert_eq!(
            StreamEvent::decode(raw).unwrap(),
            StreamEvent::Unknown { raw: raw.into() }
        );
        assert!(matches!(
            StreamEvent::decode("[1,2]").unwrap(),
            StreamEvent::Unknown { .. }
        ));
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(StreamEvent::decode("{not json").is_err());
        assert!(StreamEvent::decode(r#"{"type":"location","latitude":"x"}"#).is_err());
    }
}
