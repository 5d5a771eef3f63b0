//! Wire protocol for the embedding daemon.
//!
//! One connection carries one request and one response, each a single JSON
//! object. The client half-closes after writing its request; the daemon
//! writes its response and closes.
//!
//! Requests: `{"cmd": "embed"|"embed_batch"|"ping"|"stop", "text"?, "texts"?}`.
//! Responses: `{"ok": true, ...payload}` or `{"ok": false, "error": "..."}`.

use serde::{Deserialize, Serialize};

/// Upper bound on a request body.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024 * 1024;

/// Upper bound on a response body.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// Request exactly as it appears on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texts: Option<Vec<String>>,
}

/// A validated daemon request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonRequest {
    Embed { text: String },
    EmbedBatch { texts: Vec<String> },
    Ping,
    Stop,
}

impl DaemonRequest {
    /// Command name used on the wire.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Embed { .. } => "embed",
            Self::EmbedBatch { .. } => "embed_batch",
            Self::Ping => "ping",
            Self::Stop => "stop",
        }
    }

    /// Parse a request body. Errors are already phrased for the wire.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let raw: RawRequest =
            serde_json::from_slice(bytes).map_err(|e| format!("invalid request: {e}"))?;
        Self::try_from(raw)
    }

    /// Serialize for sending.
    pub fn to_bytes(&self) -> Vec<u8> {
        let raw = RawRequest::from(self.clone());
        // A struct of strings always serializes.
        serde_json::to_vec(&raw).unwrap_or_default()
    }
}

impl TryFrom<RawRequest> for DaemonRequest {
    type Error = String;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        match raw.cmd.as_str() {
            "embed" => raw
                .text
                .map(|text| Self::Embed { text })
                .ok_or_else(|| "missing field: text".to_string()),
            "embed_batch" => raw
                .texts
                .map(|texts| Self::EmbedBatch { texts })
                .ok_or_else(|| "missing field: texts".to_string()),
            "ping" => Ok(Self::Ping),
            "stop" => Ok(Self::Stop),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

impl From<DaemonRequest> for RawRequest {
    fn from(request: DaemonRequest) -> Self {
        let cmd = request.command().to_string();
        match request {
            DaemonRequest::Embed { text } => Self {
                cmd,
                text: Some(text),
                texts: None,
            },
            DaemonRequest::EmbedBatch { texts } => Self {
                cmd,
                text: None,
                texts: Some(texts),
            },
            DaemonRequest::Ping | DaemonRequest::Stop => Self {
                cmd,
                ..Self::default()
            },
        }
    }
}

/// Response as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn embedding(vector: Vec<f32>) -> Self {
        Self {
            ok: true,
            embedding: Some(vector),
            ..Self::default()
        }
    }

    pub fn embeddings(vectors: Vec<Vec<f32>>) -> Self {
        Self {
            ok: true,
            embeddings: Some(vectors),
            ..Self::default()
        }
    }

    pub fn pong(model: impl Into<String>) -> Self {
        Self {
            ok: true,
            model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn stopping() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"error":"response encoding failed: {e}"}}"#).into_bytes()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        assert_eq!(
            DaemonRequest::parse(br#"{"cmd":"embed","text":"hi"}"#).unwrap(),
            DaemonRequest::Embed { text: "hi".into() }
        );
        assert_eq!(
            DaemonRequest::parse(br#"{"cmd":"embed_batch","texts":["a","b"]}"#).unwrap(),
            DaemonRequest::EmbedBatch {
                texts: vec!["a".into(), "b".into()]
            }
        );
        assert_eq!(
            DaemonRequest::parse(br#"{"cmd":"ping"}"#).unwrap(),
            DaemonRequest::Ping
        );
        assert_eq!(
            DaemonRequest::parse(br#"{"cmd":"stop"}"#).unwrap(),
            DaemonRequest::Stop
        );
    }

    #[test]
    fn unknown_command_message() {
        let err = DaemonRequest::parse(br#"{"cmd":"dance"}"#).unwrap_err();
        assert_eq!(err, "unknown command: dance");
    }

    #[test]
    fn missing_payload_field() {
        let err = DaemonRequest::parse(br#"{"cmd":"embed"}"#).unwrap_err();
        assert!(err.starts_with("missing field"));
        let err = DaemonRequest::parse(br#"{"cmd":"embed_batch","text":"x"}"#).unwrap_err();
        assert!(err.contains("texts"));
    }

    #[test]
    fn invalid_json() {
        let err = DaemonRequest::parse(b"{not json").unwrap_err();
        assert!(err.starts_with("invalid request"));
        let err = DaemonRequest::parse(br#"{"text":"no cmd"}"#).unwrap_err();
        assert!(err.starts_with("invalid request"));
    }

    #[test]
    fn request_serializes_without_empty_fields() {
        let bytes = DaemonRequest::Ping.to_bytes();
        assert_eq!(bytes, br#"{"cmd":"ping"}"#.to_vec());
        let bytes = DaemonRequest::Embed { text: "x".into() }.to_bytes();
        assert_eq!(bytes, br#"{"cmd":"embed","text":"x"}"#.to_vec());
    }

    #[test]
    fn response_shapes() {
        let stop: serde_json::Value =
            serde_json::from_slice(&DaemonResponse::stopping().to_bytes()).unwrap();
        assert_eq!(stop, serde_json::json!({"ok": true}));

        let pong: serde_json::Value =
            serde_json::from_slice(&DaemonResponse::pong("lite").to_bytes()).unwrap();
        assert_eq!(pong, serde_json::json!({"ok": true, "model": "lite"}));

        let fail: serde_json::Value =
            serde_json::from_slice(&DaemonResponse::failure("boom").to_bytes()).unwrap();
        assert_eq!(fail, serde_json::json!({"ok": false, "error": "boom"}));
    }

    #[test]
    fn response_parses_foreign_payload() {
        let resp: DaemonResponse =
            serde_json::from_str(r#"{"ok":true,"embedding":[0.5,-0.25]}"#).unwrap();
        assert_eq!(resp.embedding, Some(vec![0.5, -0.25]));
        assert!(resp.error.is_none());
    }
}
