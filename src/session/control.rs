//! Control-plane messages
//!
//! Requests arrive as JSON with a `type` tag, e.g.
//!
//! ```json
//! { "type": "PUSH_CONFIG", "sourceId": 7, "config": { "primary": { "volume": 1.5 } } }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MediaKey, SourceId, StreamToken};
use crate::config::CaptureConfig;
use crate::error::{Result, TabFxError};

/// Requests handled by [`CaptureSessionManager::handle`](super::CaptureSessionManager::handle)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlRequest {
    /// Start capturing with a token, or stop without one
    #[serde(rename_all = "camelCase")]
    Capture {
        source_id: SourceId,
        #[serde(default)]
        stream_token: Option<StreamToken>,
    },
    /// Apply effect parameters to one source
    #[serde(rename_all = "camelCase")]
    PushConfig {
        source_id: SourceId,
        config: CaptureConfig,
    },
    /// Force-release every session
    SuperDisable,
    #[serde(rename_all = "camelCase")]
    ReverseBegin {
        source_id: SourceId,
        #[serde(default)]
        origin: Option<MediaKey>,
    },
    #[serde(rename_all = "camelCase")]
    ReversePlay { source_id: SourceId },
    #[serde(rename_all = "camelCase")]
    ReverseEnd { source_id: SourceId },
}

impl ControlRequest {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Reply to a [`ControlRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlResponse {
    Ok,
    /// Result of a `CAPTURE` request: whether the source is now captured
    Capture { active: bool },
    Error { code: String, message: String },
}

impl ControlResponse {
    pub fn is_ok(&self) -> bool {
        !matches!(self, ControlResponse::Error { .. })
    }
}

impl From<TabFxError> for ControlResponse {
    fn from(err: TabFxError) -> Self {
        ControlResponse::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<Result<()>> for ControlResponse {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => ControlResponse::Ok,
            Err(e) => e.into(),
        }
    }
}

/// Messages on a session's reverse control port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReverseMessage {
    /// Requester asks for playback now
    Play,
    /// Playback of the reversed clip has started
    Playing,
    /// Requester asks to stop
    Release,
    /// The session is over
    Released,
}

/// Broadcast whenever a source starts or stops being captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatus {
    pub source_id: SourceId,
    pub active: bool,
    pub at: DateTime<Utc>,
}

impl CaptureStatus {
    pub fn now(source_id: SourceId, active: bool) -> Self {
        Self {
            source_id,
            active,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_push_config() {
        let request = ControlRequest::from_json(
            r#"{"type":"PUSH_CONFIG","sourceId":7,"config":{"primary":{"volume":1.5},"pan":0.5}}"#,
        )
        .unwrap();
        match request {
            ControlRequest::PushConfig { source_id, config } => {
                assert_eq!(source_id, SourceId(7));
                assert_eq!(config.primary.volume, 1.5);
                assert_eq!(config.pan, Some(0.5));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_capture_without_token_means_stop() {
        let request = ControlRequest::from_json(r#"{"type":"CAPTURE","sourceId":2}"#).unwrap();
        assert_eq!(
            request,
            ControlRequest::Capture {
                source_id: SourceId(2),
                stream_token: None
            }
        );
    }

    #[test]
    fn test_super_disable_and_reverse_requests() {
        assert_eq!(
            ControlRequest::from_json(r#"{"type":"SUPER_DISABLE"}"#).unwrap(),
            ControlRequest::SuperDisable
        );
        assert_eq!(
            ControlRequest::from_json(r#"{"type":"REVERSE_BEGIN","sourceId":4,"origin":"video-1"}"#)
                .unwrap(),
            ControlRequest::ReverseBegin {
                source_id: SourceId(4),
                origin: Some(MediaKey::new("video-1")),
            }
        );
    }

    #[test]
    fn test_error_response() {
        let response: ControlResponse = TabFxError::SessionNotFound {
            source_id: SourceId(9),
        }
        .into();
        assert!(!response.is_ok());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("SESSION_NOT_FOUND"));
    }

    #[test]
    fn test_reverse_message_wire_names() {
        assert_eq!(serde_json::to_string(&ReverseMessage::Playing).unwrap(), "\"PLAYING\"");
        assert_eq!(
            serde_json::from_str::<ReverseMessage>("\"RELEASE\"").unwrap(),
            ReverseMessage::Release
        );
    }
}
