use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crux_http::Http;

use crate::config::ValidatedUrl;
use crate::event::Event;
use crate::upload::{UploadRequest, UploadToken};

pub type AppHttp = Http<Event>;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Success body of `POST /upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReply {
    pub file_url: String,
}

/// Body of `POST /predict`. `country` is omitted entirely when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(rename = "imagePath")]
    pub image_path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictReply {
    pub message: String,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request could not be built: {0}")]
    Request(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Correlates a request with its log records and response event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn parse_upload_reply(status: u16, body: &[u8]) -> Result<String, TransportError> {
    ensure_success(status, body)?;
    let reply: UploadReply = serde_json::from_slice(body)
        .map_err(|e| TransportError::InvalidResponse(format!("upload reply: {e}")))?;
    if reply.file_url.trim().is_empty() {
        return Err(TransportError::InvalidResponse(
            "upload reply has an empty file_url".to_string(),
        ));
    }
    Ok(reply.file_url)
}

/// The prediction text is returned verbatim; it may contain markdown.
pub fn parse_predict_reply(status: u16, body: &[u8]) -> Result<String, TransportError> {
    ensure_success(status, body)?;
    let reply: PredictReply = serde_json::from_slice(body)
        .map_err(|e| TransportError::InvalidResponse(format!("predict reply: {e}")))?;
    Ok(reply.message)
}

fn ensure_success(status: u16, body: &[u8]) -> Result<(), TransportError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(TransportError::Status {
        status,
        body: String::from_utf8_lossy(body)
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect(),
    })
}

fn decode<T>(
    result: crux_http::Result<crux_http::Response<Vec<u8>>>,
    parse: fn(u16, &[u8]) -> Result<T, TransportError>,
) -> Result<T, TransportError> {
    match result {
        Ok(mut response) => {
            let status = u16::from(response.status());
            let body = response.take_body().unwrap_or_default();
            parse(status, &body)
        }
        Err(e) => Err(TransportError::Network(e.to_string())),
    }
}

pub fn decode_upload(
    result: crux_http::Result<crux_http::Response<Vec<u8>>>,
) -> Result<String, TransportError> {
    decode(result, parse_upload_reply)
}

pub fn decode_predict(
    result: crux_http::Result<crux_http::Response<Vec<u8>>>,
) -> Result<String, TransportError> {
    decode(result, parse_predict_reply)
}

/// Issues `POST {upload}` with the multipart body built by the pipeline.
#[instrument(skip_all, fields(token = %request.token, request_id = tracing::field::Empty))]
pub fn send_upload(http: &AppHttp, endpoint: &ValidatedUrl, request: UploadRequest) -> RequestId {
    let request_id = RequestId::generate();
    tracing::Span::current().record("request_id", request_id.as_str());
    debug!(url = endpoint.as_str(), size = request.body.len(), "sending upload");

    let token: UploadToken = request.token;
    let response_id = request_id.clone();
    http.post(endpoint.as_str())
        .body_bytes(request.body)
        .header("Content-Type", request.content_type.as_str())
        .header(REQUEST_ID_HEADER, request_id.as_str())
        .send(move |result| Event::UploadResponse {
            token,
            request_id: response_id,
            outcome: decode_upload(result),
        });
    request_id
}

/// Issues `POST {predict}` with a JSON body.
#[instrument(skip_all, fields(request_id = tracing::field::Empty, has_country = body.country.is_some()))]
pub fn send_predict(
    http: &AppHttp,
    endpoint: &ValidatedUrl,
    body: &PredictRequest,
) -> Result<RequestId, TransportError> {
    let bytes = serde_json::to_vec(body).map_err(|e| {
        warn!(error = %e, "predict body serialization failed");
        TransportError::Request(e.to_string())
    })?;

    let request_id = RequestId::generate();
    tracing::Span::current().record("request_id", request_id.as_str());
    debug!(url = endpoint.as_str(), "sending predict");

    let response_id = request_id.clone();
    http.post(endpoint.as_str())
        .body_bytes(bytes)
        .header("Content-Type", "application/json")
        .header(REQUEST_ID_HEADER, request_id.as_str())
        .send(move |result| Event::PredictResponse {
            request_id: response_id,
            outcome: decode_predict(result),
        });
    Ok(request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_request_omits_missing_country() {
        let body = PredictRequest {
            image_path: "https://s3/x.jpg".into(),
            country: None,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"imagePath":"https://s3/x.jpg"}"#
        );
    }

    #[test]
    fn test_predict_request_with_country() {
        let body = PredictRequest {
            image_path: "https://s3/x.jpg".into(),
            country: Some("eu".into()),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"imagePath":"https://s3/x.jpg","country":"eu"}"#
        );
    }

    #[test]
    fn test_parse_upload_reply_success() {
        let url = parse_upload_reply(200, br#"{"file_url":"https://s3/x.jpg"}"#).unwrap();
        assert_eq!(url, "https://s3/x.jpg");
    }

    #[test]
    fn test_parse_upload_reply_ignores_extra_fields() {
        let url =
            parse_upload_reply(201, br#"{"file_url":"https://s3/y.png","etag":"abc"}"#).unwrap();
        assert_eq!(url, "https://s3/y.png");
    }

    #[test]
    fn test_parse_upload_reply_status_error() {
        let err = parse_upload_reply(500, b"boom").unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 500,
                body: "boom".into()
            }
        );
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn test_parse_upload_reply_missing_or_empty_url() {
        assert!(matches!(
            parse_upload_reply(200, br#"{"url":"x"}"#),
            Err(TransportError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_upload_reply(200, br#"{"file_url":"  "}"#),
            Err(TransportError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_predict_reply() {
        assert_eq!(
            parse_predict_reply(200, br#"{"message":"**Compliant.**"}"#).unwrap(),
            "**Compliant.**"
        );
        assert!(matches!(
            parse_predict_reply(200, b"not json"),
            Err(TransportError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_predict_reply(404, br#"{"message":"missing"}"#),
            Err(TransportError::Status { status: 404, .. })
        ));
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_CHARS * 2);
        match parse_predict_reply(502, body.as_bytes()) {
            Err(TransportError::Status { body, .. }) => {
                assert_eq!(body.len(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }
}
