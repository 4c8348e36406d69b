//! Upstream embeddings client.
//!
//! One operation: POST the (sub-)request to the configured URL, always with
//! `encoding_format=base64` so storage stays uniform, forwarding the client's
//! `Authorization` header verbatim. Non-2xx responses become a typed error
//! carrying the upstream status, error type, message, and usage.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default user agent for upstream calls.
pub const USER_AGENT: &str = concat!("cachembed/", env!("CARGO_PKG_VERSION"));

/// Whole-round-trip timeout for one upstream call.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Prompt/total token usage, passed through to clients on fills.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    input: &'a Value,
    model: &'a str,
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

/// The embedding value in an upstream response: a base64 string when the
/// upstream honors `encoding_format=base64`, a float array otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingValue {
    Base64(String),
    Floats(Vec<f32>),
}

impl EmbeddingValue {
    /// Normalize to the base64 storage form.
    pub fn into_base64(self) -> String {
        match self {
            Self::Base64(s) => s,
            Self::Floats(floats) => crate::codec::encode(&floats),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpstreamEmbedding {
    pub embedding: EmbeddingValue,
    #[serde(default)]
    pub index: u32,
}

/// Parsed 200 response from the upstream.
#[derive(Debug, Deserialize)]
pub struct UpstreamResponse {
    pub data: Vec<UpstreamEmbedding>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamErrorBody {
    #[serde(default)]
    error: UpstreamErrorDetail,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    r#type: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reaching or talking to the upstream.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The upstream answered with a non-2xx status.
    #[error("upstream error ({status}): {message}")]
    Api {
        status: u16,
        error_type: String,
        message: String,
        usage: Option<Usage>,
    },

    /// The upstream could not be reached, timed out, or sent an unreadable
    /// body.
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the configured upstream embeddings endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    url: String,
    client: Client,
}

impl UpstreamClient {
    pub fn new(url: String) -> Self {
        let client = match Client::builder()
            .user_agent(USER_AGENT)
            .timeout(UPSTREAM_TIMEOUT)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build upstream HTTP client, using defaults");
                Client::default()
            }
        };
        Self { url, client }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request embeddings for `input` from the upstream.
    ///
    /// `input` is already shaped for the wire (the caller subsets it);
    /// `authorization` is the client's full header value, forwarded as-is.
    pub async fn create_embedding(
        &self,
        input: &Value,
        model: &str,
        dimensions: Option<u32>,
        authorization: &str,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let body = UpstreamRequest {
            input,
            model,
            encoding_format: "base64",
            dimensions,
        };

        let resp = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, authorization)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            let parsed: UpstreamResponse = resp.json().await?;
            return Ok(parsed);
        }

        Err(Self::api_error(status, resp.text().await.unwrap_or_default()))
    }

    /// Build the typed error for a non-2xx response, tolerating bodies that
    /// are not the OpenAI error envelope.
    fn api_error(status: StatusCode, body: String) -> UpstreamError {
        let parsed: UpstreamErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let message = if parsed.error.message.is_empty() {
            body
        } else {
            parsed.error.message
        };
        let error_type = if parsed.error.r#type.is_empty() {
            "upstream_error".to_string()
        } else {
            parsed.error.r#type
        };
        UpstreamError::Api {
            status: status.as_u16(),
            error_type,
            message,
            usage: parsed.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_body_shape() {
        let input = json!(["Hello"]);
        let body = UpstreamRequest {
            input: &input,
            model: "text-embedding-ada-002",
            encoding_format: "base64",
            dimensions: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["input"], json!(["Hello"]));
        assert_eq!(value["encoding_format"], "base64");
        assert!(value.get("dimensions").is_none());

        let body = UpstreamRequest {
            input: &input,
            model: "text-embedding-3-small",
            encoding_format: "base64",
            dimensions: Some(256),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["dimensions"], 256);
    }

    #[test]
    fn test_embedding_value_normalization() {
        let b64 = EmbeddingValue::Base64("AAAAPgAAgD4AAAA/".into());
        assert_eq!(b64.into_base64(), "AAAAPgAAgD4AAAA/");

        let floats = EmbeddingValue::Floats(vec![0.125, 0.25, 0.5]);
        assert_eq!(floats.into_base64(), "AAAAPgAAgD4AAAA/");
    }

    #[test]
    fn test_response_parses_both_embedding_forms() {
        let parsed: UpstreamResponse = serde_json::from_value(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "embedding": "AACAPw==", "index": 0},
                {"object": "embedding", "embedding": [2.0], "index": 1}
            ],
            "model": "text-embedding-ada-002",
            "usage": {"prompt_tokens": 4, "total_tokens": 4}
        }))
        .unwrap();

        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.usage.prompt_tokens, 4);
        assert!(matches!(parsed.data[0].embedding, EmbeddingValue::Base64(_)));
        assert!(matches!(parsed.data[1].embedding, EmbeddingValue::Floats(_)));
    }

    #[tokio::test]
    async fn test_create_embedding_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "input": "Hello",
                "model": "text-embedding-ada-002",
                "encoding_format": "base64"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"object": "embedding", "embedding": "AACAPw==", "index": 0}],
                "model": "text-embedding-ada-002",
                "usage": {"prompt_tokens": 2, "total_tokens": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::new(format!("{}/v1/embeddings", server.uri()));
        let resp = client
            .create_embedding(&json!("Hello"), "text-embedding-ada-002", None, "Bearer sk-test")
            .await
            .unwrap();

        assert_eq!(resp.data.len(), 1);
        assert_eq!(resp.model, "text-embedding-ada-002");
        assert_eq!(resp.usage.total_tokens, 2);
    }

    #[tokio::test]
    async fn test_create_embedding_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "message": "Rate limit reached",
                    "type": "rate_limit_error",
                    "code": "rate_limit_exceeded"
                }
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(server.uri());
        let err = client
            .create_embedding(&json!("x"), "m", None, "Bearer sk-test")
            .await
            .unwrap_err();

        match err {
            UpstreamError::Api {
                status,
                error_type,
                message,
                usage,
            } => {
                assert_eq!(status, 429);
                assert_eq!(error_type, "rate_limit_error");
                assert_eq!(message, "Rate limit reached");
                assert!(usage.is_none());
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_embedding_unparseable_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("gateway exploded"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(server.uri());
        let err = client
            .create_embedding(&json!("x"), "m", None, "Bearer sk-test")
            .await
            .unwrap_err();

        match err {
            UpstreamError::Api {
                status,
                error_type,
                message,
                ..
            } => {
                assert_eq!(status, 500);
                assert_eq!(error_type, "upstream_error");
                assert_eq!(message, "gateway exploded");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_embedding_transport_error() {
        // Nothing is listening on this port.
        let client = UpstreamClient::new("http://127.0.0.1:9/v1/embeddings".to_string());
        let err = client
            .create_embedding(&json!("x"), "m", None, "Bearer sk-test")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)));
    }
}
