//! Wire format of the push channel.
//!
//! Every message is a JSON object tagged by `type`. Inbound tags we do not
//! know are passed through as [`InboundMessage::Unknown`] and ignored by the
//! dispatcher; only an unparseable payload is a [`CaptureError::MalformedEvent`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CaptureError;
use crate::fanout::Topic;
use crate::session::DetectionEvent;

const SUBJECT_KEYS: [&str; 4] = ["subjectId", "rollNo", "rollNumber", "id"];
const NAME_KEYS: [&str; 3] = ["displayName", "name", "studentName"];
const TIME_KEYS: [&str; 2] = ["observedAt", "timestamp"];
const THUMBNAIL_KEYS: [&str; 2] = ["thumbnail", "image"];
const SESSION_KEYS: [&str; 1] = ["sessionId"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResetTarget {
    Students,
    Attendance,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    AttendanceMarked,
    StudentRegistered,
    FacultyRegistered,
    SmsSent,
    DatabaseReset(ResetTarget),
}

impl ChangeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ChangeKind::AttendanceMarked => "attendance_marked",
            ChangeKind::StudentRegistered => "student_registered",
            ChangeKind::FacultyRegistered => "faculty_registered",
            ChangeKind::SmsSent => "sms_sent",
            ChangeKind::DatabaseReset(_) => "database_reset",
        }
    }

    /// Fan-out topics this change dirties.
    pub fn topics(&self) -> &'static [Topic] {
        match self {
            ChangeKind::AttendanceMarked => &[Topic::AttendanceChanged],
            ChangeKind::StudentRegistered | ChangeKind::FacultyRegistered => {
                &[Topic::DirectoryChanged]
            }
            ChangeKind::SmsSent => &[Topic::SmsChanged],
            ChangeKind::DatabaseReset(ResetTarget::Students) => &[Topic::DirectoryChanged],
            ChangeKind::DatabaseReset(ResetTarget::Attendance) => &[Topic::AttendanceChanged],
            ChangeKind::DatabaseReset(ResetTarget::All) => {
                &[Topic::DirectoryChanged, Topic::AttendanceChanged]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Ping,
    Pong,
    Detection(DetectionEvent),
    Change { kind: ChangeKind, data: Value },
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Ping,
    Pong,
    StreamFrame {
        #[serde(rename = "sessionId")]
        session_id: String,
        frame: String,
    },
}

impl OutboundMessage {
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub fn parse_inbound(text: &str) -> Result<InboundMessage, CaptureError> {
    parse_inbound_at(text, Utc::now())
}

/// `received_at` stamps detections that arrive without a timestamp.
pub fn parse_inbound_at(
    text: &str,
    received_at: DateTime<Utc>,
) -> Result<InboundMessage, CaptureError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| CaptureError::MalformedEvent(format!("invalid json: {err}")))?;
    let Value::Object(object) = value else {
        return Err(CaptureError::MalformedEvent(
            "message is not a json object".into(),
        ));
    };
    let tag = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CaptureError::MalformedEvent("message has no string `type`".into()))?;

    let change = |kind: ChangeKind| InboundMessage::Change {
        kind,
        data: object.get("data").cloned().unwrap_or(Value::Null),
    };

    let message = match tag {
        "ping" => InboundMessage::Ping,
        "pong" => InboundMessage::Pong,
        "detection_result" => {
            let fields = match object.get("data") {
                Some(Value::Object(data)) => data,
                _ => &object,
            };
            let mut detection = parse_detection(fields, received_at)?;
            if detection.session_id.is_none() {
                detection.session_id = first_text(&object, &SESSION_KEYS);
            }
            InboundMessage::Detection(detection)
        }
        "attendance_marked" => change(ChangeKind::AttendanceMarked),
        "student_registered" => change(ChangeKind::StudentRegistered),
        "faculty_registered" => change(ChangeKind::FacultyRegistered),
        "sms_sent" => change(ChangeKind::SmsSent),
        "database_reset" => {
            let target = match object.get("target").and_then(Value::as_str) {
                Some("students") => ResetTarget::Students,
                Some("attendance") => ResetTarget::Attendance,
                _ => ResetTarget::All,
            };
            change(ChangeKind::DatabaseReset(target))
        }
        other => InboundMessage::Unknown(other.to_string()),
    };
    Ok(message)
}

fn first_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match fields.get(*key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn parse_detection(
    fields: &Map<String, Value>,
    received_at: DateTime<Utc>,
) -> Result<DetectionEvent, CaptureError> {
    let raw_confidence = fields
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| CaptureError::MalformedEvent("detection without numeric confidence".into()))?;
    let confidence = normalize_confidence(raw_confidence)?;

    let observed_at = match first_text(fields, &TIME_KEYS) {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| CaptureError::MalformedEvent(format!("bad timestamp '{raw}': {err}")))?,
        None => received_at,
    };

    let subject_id = first_text(fields, &SUBJECT_KEYS);
    let display_name = first_text(fields, &NAME_KEYS)
        .or_else(|| subject_id.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    Ok(DetectionEvent {
        subject_id,
        display_name,
        confidence,
        observed_at,
        thumbnail: first_text(fields, &THUMBNAIL_KEYS),
        session_id: first_text(fields, &SESSION_KEYS),
    })
}

/// Scales fractional scores (`0.98`) to percent and clamps into `0..=100`.
pub fn normalize_confidence(raw: f64) -> Result<f64, CaptureError> {
    if !raw.is_finite() {
        return Err(CaptureError::MalformedEvent(format!(
            "confidence {raw} is not finite"
        )));
    }
    let percent = if raw <= 1.0 { raw * 100.0 } else { raw };
    Ok(percent.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 5, 0).unwrap()
    }

    #[test]
    fn parses_full_detection_payload() {
        let text = r#"{
            "type": "detection_result",
            "rollNo": "CS2021001",
            "name": "Rahul Sharma",
            "confidence": 98,
            "timestamp": "2026-03-02T09:06:00Z",
            "image": "data:image/jpeg;base64,AAAA"
        }"#;

        let InboundMessage::Detection(event) = parse_inbound_at(text, at()).unwrap() else {
            panic!("expected a detection");
        };
        assert_eq!(event.subject_id.as_deref(), Some("CS2021001"));
        assert_eq!(event.display_name, "Rahul Sharma");
        assert_eq!(event.confidence, 98.0);
        assert_eq!(
            event.observed_at,
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 6, 0).unwrap()
        );
        assert!(event.thumbnail.is_some());
    }

    #[test]
    fn fractional_confidence_and_missing_fields_are_normalized() {
        let text = r#"{"type": "detection_result", "data": {"name": "Nikky", "confidence": 0.98}}"#;

        let InboundMessage::Detection(event) = parse_inbound_at(text, at()).unwrap() else {
            panic!("expected a detection");
        };
        assert_eq!(event.subject_id, None);
        assert_eq!(event.display_name, "Nikky");
        assert!((event.confidence - 98.0).abs() < 1e-9);
        assert_eq!(event.observed_at, at());
    }

    #[test]
    fn echoed_session_id_is_kept() {
        let top = r#"{"type": "detection_result", "sessionId": "s-1", "rollNo": "A", "confidence": 90}"#;
        let nested = r#"{"type": "detection_result", "sessionId": "s-1", "data": {"rollNo": "A", "confidence": 90}}"#;
        for text in [top, nested] {
            let InboundMessage::Detection(event) = parse_inbound_at(text, at()).unwrap() else {
                panic!("expected a detection");
            };
            assert_eq!(event.session_id.as_deref(), Some("s-1"));
        }

        let bare = r#"{"type": "detection_result", "rollNo": "A", "confidence": 90}"#;
        let InboundMessage::Detection(event) = parse_inbound_at(bare, at()).unwrap() else {
            panic!("expected a detection");
        };
        assert_eq!(event.session_id, None);
    }

    #[test]
    fn numeric_subject_ids_are_accepted() {
        let text = r#"{"type": "detection_result", "id": 42, "confidence": 120}"#;
        let InboundMessage::Detection(event) = parse_inbound_at(text, at()).unwrap() else {
            panic!("expected a detection");
        };
        assert_eq!(event.subject_id.as_deref(), Some("42"));
        assert_eq!(event.display_name, "42");
        assert_eq!(event.confidence, 100.0);
    }

    #[test]
    fn change_notifications_map_to_topics() {
        let marked = parse_inbound(r#"{"type":"attendance_marked","data":{"student_id":3}}"#)
            .unwrap();
        let InboundMessage::Change { kind, data } = marked else {
            panic!("expected a change");
        };
        assert_eq!(kind.topics(), &[Topic::AttendanceChanged]);
        assert_eq!(data["student_id"], 3);

        let reset = parse_inbound(r#"{"type":"database_reset","target":"all"}"#).unwrap();
        let InboundMessage::Change { kind, .. } = reset else {
            panic!("expected a change");
        };
        assert_eq!(kind, ChangeKind::DatabaseReset(ResetTarget::All));
        assert_eq!(
            kind.topics(),
            &[Topic::DirectoryChanged, Topic::AttendanceChanged]
        );
    }

    #[test]
    fn unknown_tags_are_not_errors() {
        assert_eq!(
            parse_inbound(r#"{"type":"server_restarting"}"#).unwrap(),
            InboundMessage::Unknown("server_restarting".into())
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        for text in [
            "not json",
            "[1, 2]",
            r#"{"kind": "ping"}"#,
            r#"{"type": "detection_result", "name": "No score"}"#,
            r#"{"type": "detection_result", "confidence": 0.9, "timestamp": "yesterday"}"#,
        ] {
            assert!(
                matches!(parse_inbound(text), Err(CaptureError::MalformedEvent(_))),
                "{text} should be malformed"
            );
        }
    }

    #[test]
    fn outbound_frame_uses_camel_case_session_id() {
        let wire = OutboundMessage::StreamFrame {
            session_id: "s-1".into(),
            frame: "data:image/jpeg;base64,AA==".into(),
        }
        .to_wire()
        .unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], "stream_frame");
        assert_eq!(value["sessionId"], "s-1");

        assert_eq!(OutboundMessage::Ping.to_wire().unwrap(), r#"{"type":"ping"}"#);
    }
}
