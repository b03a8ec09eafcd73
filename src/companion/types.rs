//! Wire types for the companion device API

use serde::{Deserialize, Serialize};

use crate::recognition::TranscriptKind;

/// `GET /health` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Whether the companion's streaming recognizer has a model loaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vosk_available: Option<bool>,
}

impl HealthResponse {
    /// Whether the companion reports itself healthy
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// `POST /start-nfc` request body
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StartReadRequest {
    /// Reader-side timeout in seconds
    pub timeout: u32,
}

/// Generic `{status, message}` acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Card reader status reported by `GET /check-nfc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderStatus {
    Idle,
    Waiting,
    Reading,
    Success,
    Timeout,
    #[serde(other)]
    Unknown,
}

/// `GET /check-nfc` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReadResponse {
    pub status: ReaderStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idm: Option<String>,
}

/// `GET /read-nfc` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestCardResponse {
    /// `ok` or `no_card`
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idm: Option<String>,
}

/// `POST /speak` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
}

/// Server-to-client frame on the `/stt/stream` socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    /// The recognizer refused or aborted the stream
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<String>,
    },
    /// Partial or final transcript
    Transcript {
        #[serde(rename = "type")]
        kind: TranscriptKind,
        text: String,
    },
}

impl StreamMessage {
    /// Parse a text frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is not a known message shape
    pub fn parse(frame: &str) -> crate::Result<Self> {
        serde_json::from_str(frame)
            .map_err(|e| crate::Error::Protocol(format!("unexpected stream frame: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_and_final() {
        assert_eq!(
            StreamMessage::parse(r#"{"type":"partial","text":"こんに"}"#).unwrap(),
            StreamMessage::Transcript {
                kind: TranscriptKind::Partial,
                text: "こんに".to_string()
            }
        );
        assert_eq!(
            StreamMessage::parse(r#"{"type":"final","text":"こんにちは"}"#).unwrap(),
            StreamMessage::Transcript {
                kind: TranscriptKind::Final,
                text: "こんにちは".to_string()
            }
        );
    }

    #[test]
    fn test_parse_error_frame() {
        let msg = StreamMessage::parse(
            r#"{"error":"VOSK model not loaded","fallback":"web_speech_api"}"#,
        )
        .unwrap();
        assert!(matches!(msg, StreamMessage::Error { ref error, .. } if error == "VOSK model not loaded"));
    }

    #[test]
    fn test_parse_malformed_frame() {
        let err = StreamMessage::parse(r#"{"type":"bogus","text":"x"}"#).unwrap_err();
        assert!(matches!(err, crate::Error::Protocol(_)));

        assert!(StreamMessage::parse("not json").is_err());
    }

    #[test]
    fn test_reader_status_wire_names() {
        let check: CheckReadResponse =
            serde_json::from_str(r#"{"status":"success","idm":"04AB12CD"}"#).unwrap();
        assert_eq!(check.status, ReaderStatus::Success);
        assert_eq!(check.idm.as_deref(), Some("04AB12CD"));

        let reading: CheckReadResponse = serde_json::from_str(r#"{"status":"reading"}"#).unwrap();
        assert_eq!(reading.status, ReaderStatus::Reading);

        let odd: CheckReadResponse = serde_json::from_str(r#"{"status":"calibrating"}"#).unwrap();
        assert_eq!(odd.status, ReaderStatus::Unknown);
    }

    #[test]
    fn test_health_flags() {
        let health: HealthResponse =
            serde_json::from_str(r#"{"status":"ok","service":"nfc-api","vosk_available":false}"#)
                .unwrap();
        assert!(health.is_ok());
        assert_eq!(health.vosk_available, Some(false));

        let bare: HealthResponse = serde_json::from_str(r#"{"status":"degraded"}"#).unwrap();
        assert!(!bare.is_ok());
        assert_eq!(bare.vosk_available, None);
    }
}
