//! HTTP API for a parla speech session.
//!
//! Runs on port 2004 by default. CORS-permissive so a browser form served
//! from anywhere can drive the session. Every form control maps to one
//! endpoint; every endpoint that changes state answers with the new
//! [`SessionState`].

use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use parla_core::types::{SessionState, Voice};

use crate::error::SessionError;
use crate::session::SpeechSession;

/// Build the axum router around a shared [`SpeechSession`].
pub fn router(session: SpeechSession) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/voices", get(voices))
        .route("/phrases", get(phrases))
        .route("/text", put(set_text))
        .route("/voice", put(set_voice))
        .route("/convert", post(convert))
        .route("/preview", post(preview))
        .route("/stop", post(stop))
        .route("/voice/random", post(random_voice))
        .route("/text/random", post(random_text))
        .route("/text/clear", post(clear_text))
        .route("/recent/{index}", post(select_recent))
        .route("/error", delete(dismiss_error))
        .route("/download", get(download))
        .route("/audio/{id}", get(audio))
        .layer(CorsLayer::permissive())
        .with_state(session)
}

// ─── Errors ────────────────────────────────────────────────────────────────

struct ApiError(StatusCode, String);

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::EmptyText | SessionError::UnknownVoice(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SessionError::Busy => StatusCode::CONFLICT,
            SessionError::MissingCredential => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Synthesis(_) => StatusCode::BAD_GATEWAY,
            SessionError::NoAudio => StatusCode::NOT_FOUND,
            SessionError::Playback(_) | SessionError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "ok": false, "error": self.1 }));
        (self.0, body).into_response()
    }
}

type ApiResult = Result<Json<SessionState>, ApiError>;

// ─── Requests ──────────────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct TextRequest {
    text: String,
}

#[derive(serde::Deserialize)]
struct VoiceRequest {
    voice_id: String,
}

#[derive(Default, serde::Deserialize)]
struct ConvertRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    voice_id: Option<String>,
}

#[derive(Default, serde::Deserialize)]
struct PreviewRequest {
    #[serde(default)]
    voice_id: Option<String>,
}

// ─── Handlers ──────────────────────────────────────────────────────────────

async fn status(State(session): State<SpeechSession>) -> Json<SessionState> {
    Json(session.status())
}

async fn voices(State(session): State<SpeechSession>) -> Json<Vec<Voice>> {
    Json(session.voices().to_vec())
}

async fn phrases(State(session): State<SpeechSession>) -> Json<Vec<String>> {
    Json(session.example_phrases().to_vec())
}

async fn set_text(
    State(session): State<SpeechSession>,
    Json(req): Json<TextRequest>,
) -> Json<SessionState> {
    session.set_text(&req.text);
    Json(session.status())
}

async fn set_voice(
    State(session): State<SpeechSession>,
    Json(req): Json<VoiceRequest>,
) -> ApiResult {
    session.select_voice(&req.voice_id)?;
    Ok(Json(session.status()))
}

/// Convert and play. Fields present in the body override the form values
/// and are written back to the form once the request is accepted; an empty
/// body converts the form as it stands.
async fn convert(
    State(session): State<SpeechSession>,
    req: Option<Json<ConvertRequest>>,
) -> ApiResult {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let form = session.status();
    let text = req.text.clone().unwrap_or(form.current_text);
    let voice_id = req.voice_id.clone().unwrap_or(form.selected_voice_id);

    let result = session.convert_and_play(&text, &voice_id).await;
    if !matches!(&result, Err(err) if err.is_rejection()) {
        apply_overrides(&session, &req)?;
    }
    result?;
    Ok(Json(session.status()))
}

fn apply_overrides(session: &SpeechSession, req: &ConvertRequest) -> Result<(), SessionError> {
    if let Some(voice_id) = req.voice_id.as_deref() {
        session.select_voice(voice_id)?;
    }
    if let Some(text) = req.text.as_deref() {
        session.set_text(text);
    }
    Ok(())
}

async fn preview(
    State(session): State<SpeechSession>,
    req: Option<Json<PreviewRequest>>,
) -> ApiResult {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let voice_id = req
        .voice_id
        .unwrap_or_else(|| session.status().selected_voice_id);
    session.preview_voice(&voice_id).await?;
    Ok(Json(session.status()))
}

async fn stop(State(session): State<SpeechSession>) -> Json<SessionState> {
    session.stop();
    Json(session.status())
}

async fn random_voice(State(session): State<SpeechSession>) -> Json<SessionState> {
    session.pick_random_voice();
    Json(session.status())
}

async fn random_text(State(session): State<SpeechSession>) -> Json<SessionState> {
    session.pick_random_phrase();
    Json(session.status())
}

async fn clear_text(State(session): State<SpeechSession>) -> Json<SessionState> {
    session.clear_text();
    Json(session.status())
}

async fn select_recent(
    State(session): State<SpeechSession>,
    Path(index): Path<usize>,
) -> ApiResult {
    match session.select_recent(index) {
        Some(_) => Ok(Json(session.status())),
        None => Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("no recent phrase at index {index}"),
        )),
    }
}

async fn dismiss_error(State(session): State<SpeechSession>) -> Json<SessionState> {
    session.dismiss_error();
    Json(session.status())
}

/// Current audio as an attachment named `speech.<ext>`.
async fn download(State(session): State<SpeechSession>) -> Result<Response, ApiError> {
    let (audio, mime) = session.current_audio().ok_or(SessionError::NoAudio)?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        session.config().output_format.download_name()
    );
    let headers = [
        (CONTENT_TYPE, mime.to_string()),
        (CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, audio).into_response())
}

async fn audio(
    State(session): State<SpeechSession>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let (audio, mime) = session
        .registry()
        .resolve(id)
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("audio {id} has been released")))?;
    Ok(([(CONTENT_TYPE, mime)], audio).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parla_core::types::SessionConfig;

    use crate::playback::SilentOutput;
    use crate::provider::ElevenLabsClient;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// A fake provider endpoint returning fixed MP3-ish bytes.
    async fn spawn_provider() -> String {
        let app = Router::new().route(
            "/v1/text-to-speech/{voice_id}",
            post(|| async { vec![0x49u8, 0x44, 0x33] }),
        );
        spawn(app).await
    }

    async fn spawn_api(api_key: Option<&str>) -> String {
        spawn_api_with(api_key, spawn_provider().await).await
    }

    async fn spawn_api_with(api_key: Option<&str>, provider_url: String) -> String {
        let config = SessionConfig {
            api_key: api_key.map(String::from),
            base_url: provider_url.clone(),
            ..Default::default()
        };
        let session = SpeechSession::new(
            config,
            Arc::new(ElevenLabsClient::new(provider_url)),
            Arc::new(SilentOutput),
        );
        spawn(router(session)).await
    }

    #[tokio::test]
    async fn convert_then_download() {
        let base = spawn_api(Some("sk_test")).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/convert"))
            .json(&serde_json::json!({ "text": "Hello world" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let state: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(state["recent_phrases"][0], "Hello world");
        assert_eq!(state["last_error"], serde_json::Value::Null);
        let url = state["current_audio_url"].as_str().unwrap().to_string();

        let resp = client.get(format!("{base}/download")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()[CONTENT_TYPE], "audio/mpeg");
        assert!(
            resp.headers()[CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .contains("speech.mp3")
        );
        assert_eq!(&resp.bytes().await.unwrap()[..], &[0x49, 0x44, 0x33]);

        let id = crate::handle::parse_url(&url).unwrap();
        let resp = client.get(format!("{base}/audio/{id}")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn missing_key_is_reported() {
        let base = spawn_api(None).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/convert"))
            .json(&serde_json::json!({ "text": "Hello" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().contains("API key"));

        let state: serde_json::Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(state["last_error"].is_string());

        let state: serde_json::Value = client
            .delete(format!("{base}/error"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(state["last_error"].is_null());
    }

    #[tokio::test]
    async fn empty_text_is_unprocessable() {
        let base = spawn_api(Some("sk_test")).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/convert"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);
    }

    #[tokio::test]
    async fn rejected_convert_leaves_form_untouched() {
        let base = spawn_api(Some("sk_test")).await;
        let client = reqwest::Client::new();
        let before: serde_json::Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let resp = client
            .post(format!("{base}/convert"))
            .json(&serde_json::json!({ "text": "   ", "voice_id": "EXAVITQu4vr4xnSDxMaL" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);

        let after: serde_json::Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(after["current_text"], before["current_text"]);
        assert_eq!(after["selected_voice_id"], before["selected_voice_id"]);
    }

    #[tokio::test]
    async fn busy_convert_leaves_form_untouched() {
        let slow = Router::new().route(
            "/v1/text-to-speech/{voice_id}",
            post(|| async {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                vec![0x49u8, 0x44, 0x33]
            }),
        );
        let base = spawn_api_with(Some("sk_test"), spawn(slow).await).await;
        let client = reqwest::Client::new();

        let first = tokio::spawn({
            let client = client.clone();
            let url = format!("{base}/convert");
            async move {
                client
                    .post(url)
                    .json(&serde_json::json!({ "text": "first" }))
                    .send()
                    .await
                    .unwrap()
                    .status()
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let resp = client
            .post(format!("{base}/convert"))
            .json(&serde_json::json!({ "text": "second", "voice_id": "EXAVITQu4vr4xnSDxMaL" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
        assert_eq!(first.await.unwrap(), 200);

        let state: serde_json::Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(state["current_text"], "first");
        assert_ne!(state["selected_voice_id"], "EXAVITQu4vr4xnSDxMaL");
    }

    #[tokio::test]
    async fn form_controls() {
        let base = spawn_api(Some("sk_test")).await;
        let client = reqwest::Client::new();

        let voices: Vec<Voice> = client
            .get(format!("{base}/voices"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(voices.len(), 6);

        let state: serde_json::Value = client
            .put(format!("{base}/text"))
            .json(&serde_json::json!({ "text": "typed" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(state["current_text"], "typed");

        let state: serde_json::Value = client
            .post(format!("{base}/text/clear"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(state["current_text"], "");

        let resp = client
            .put(format!("{base}/voice"))
            .json(&serde_json::json!({ "voice_id": "nope" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);

        let resp = client
            .post(format!("{base}/recent/0"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = client.get(format!("{base}/download")).send().await.unwrap();
        assert_eq!(resp.status(), 404);

        let state: serde_json::Value = client
            .post(format!("{base}/stop"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(state["is_playing"], false);
    }
}
