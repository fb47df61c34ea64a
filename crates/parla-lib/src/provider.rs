//! Speech provider client: one request type, a streamed audio body back.
//!
//! ```text
//! POST {base_url}/v1/text-to-speech/{voice_id}?output_format=mp3_44100_128
//! xi-api-key: <credential>
//! {"text": "...", "model_id": "eleven_multilingual_v2"}
//! ```
//!
//! The body is handed back as a stream; the caller drains it.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use tracing::{debug, error};

use parla_core::audio::OutputFormat;

use crate::error::SynthesisError;

/// Streamed audio bytes in arrival order.
pub type AudioStream = BoxStream<'static, Result<Bytes, SynthesisError>>;

/// One synthesis call.
#[derive(Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub api_key: String,
    pub voice_id: String,
    pub text: String,
    pub model_id: String,
    pub output_format: OutputFormat,
}

impl fmt::Debug for SynthesisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisRequest")
            .field("api_key", &"<redacted>")
            .field("voice_id", &self.voice_id)
            .field("text", &self.text)
            .field("model_id", &self.model_id)
            .field("output_format", &self.output_format.to_string())
            .finish()
    }
}

/// A hosted text-to-speech service.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<AudioStream, SynthesisError>;
}

/// ElevenLabs text-to-speech over HTTPS.
#[derive(Clone)]
pub struct ElevenLabsClient {
    client: reqwest::Client,
    base_url: String,
}

impl ElevenLabsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!("{}/v1/text-to-speech/{voice_id}", self.base_url)
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabsClient {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<AudioStream, SynthesisError> {
        let url = self.endpoint(&request.voice_id);
        let body = serde_json::json!({
            "text": request.text,
            "model_id": request.model_id,
        });

        debug!(
            "synthesize: POST voice={} {} chars format={}",
            request.voice_id,
            request.text.len(),
            request.output_format
        );

        let resp = self
            .client
            .post(&url)
            .query(&[("output_format", request.output_format.to_string())])
            .header("xi-api-key", &request.api_key)
            .header(ACCEPT, request.output_format.mime_type())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("synthesize: request failed: {e}");
                SynthesisError::Request(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!("synthesize: provider error {status}: {text}");
            return Err(SynthesisError::Provider {
                status: status.as_u16(),
                message: provider_message(status.as_u16(), &text),
            });
        }

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| SynthesisError::Stream(e.to_string())))
            .boxed())
    }
}

/// Pull the human-readable message out of a provider error body.
///
/// Understands `{"detail": {"message": ..}}`, `{"detail": ".."}`,
/// `{"detail": [{"msg": ..}]}` and `{"message": ..}`; anything else is
/// returned as the trimmed raw body.
fn provider_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let detail = &json["detail"];
        let found = detail["message"]
            .as_str()
            .or_else(|| detail.as_str())
            .or_else(|| detail[0]["msg"].as_str())
            .or_else(|| json["message"].as_str());
        if let Some(message) = found {
            return message.to_string();
        }
    }
    if body.is_empty() {
        format!("provider returned status {status}")
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};

    use crate::drain::drain_stream;

    #[derive(Debug, Default, Clone)]
    struct Captured {
        voice_id: String,
        query: HashMap<String, String>,
        api_key: Option<String>,
        body: serde_json::Value,
    }

    type Shared = Arc<Mutex<Option<Captured>>>;

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request(text: &str) -> SynthesisRequest {
        SynthesisRequest {
            api_key: "sk_test".into(),
            voice_id: "JBFqnCBsd6RMkjVDRZzb".into(),
            text: text.into(),
            model_id: "eleven_multilingual_v2".into(),
            output_format: OutputFormat::default(),
        }
    }

    async fn ok_handler(
        State(shared): State<Shared>,
        Path(voice_id): Path<String>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Vec<u8> {
        *shared.lock().unwrap() = Some(Captured {
            voice_id,
            query,
            api_key: headers
                .get("xi-api-key")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            body,
        });
        vec![0x01, 0x02, 0x03]
    }

    #[tokio::test]
    async fn sends_expected_request_and_streams_body() {
        let shared: Shared = Arc::default();
        let app = Router::new()
            .route("/v1/text-to-speech/{voice_id}", post(ok_handler))
            .with_state(shared.clone());
        let base = spawn_server(app).await;

        let client = ElevenLabsClient::new(format!("{base}/"));
        let stream = client.synthesize(request("Hello world")).await.unwrap();
        let audio = drain_stream(stream).await.unwrap();
        assert_eq!(&audio[..], &[0x01, 0x02, 0x03]);

        let captured = shared.lock().unwrap().clone().unwrap();
        assert_eq!(captured.voice_id, "JBFqnCBsd6RMkjVDRZzb");
        assert_eq!(captured.query["output_format"], "mp3_44100_128");
        assert_eq!(captured.api_key.as_deref(), Some("sk_test"));
        assert_eq!(captured.body["text"], "Hello world");
        assert_eq!(captured.body["model_id"], "eleven_multilingual_v2");
    }

    #[tokio::test]
    async fn provider_error_surfaces_message() {
        let app = Router::new().route(
            "/v1/text-to-speech/{voice_id}",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    r#"{"detail":{"status":"invalid_api_key","message":"Invalid API key"}}"#,
                )
            }),
        );
        let base = spawn_server(app).await;

        let err = ElevenLabsClient::new(base)
            .synthesize(request("hi"))
            .await
            .err()
            .unwrap();
        assert_eq!(
            err,
            SynthesisError::Provider {
                status: 401,
                message: "Invalid API key".into()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_request_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = ElevenLabsClient::new(format!("http://{addr}"))
            .synthesize(request("hi"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SynthesisError::Request(_)));
    }

    #[test]
    fn provider_message_shapes() {
        assert_eq!(
            provider_message(400, r#"{"detail":{"message":"quota exceeded"}}"#),
            "quota exceeded"
        );
        assert_eq!(provider_message(404, r#"{"detail":"voice not found"}"#), "voice not found");
        assert_eq!(
            provider_message(422, r#"{"detail":[{"loc":["body","text"],"msg":"field required"}]}"#),
            "field required"
        );
        assert_eq!(provider_message(500, r#"{"message":"oops"}"#), "oops");
        assert_eq!(provider_message(502, "Bad Gateway\n"), "Bad Gateway");
        assert_eq!(provider_message(503, ""), "provider returned status 503");
    }

    #[test]
    fn debug_redacts_key() {
        let text = format!("{:?}", request("hi"));
        assert!(!text.contains("sk_test"));
        assert!(text.contains("redacted"));
    }
}
