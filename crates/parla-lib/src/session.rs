//! Speech session controller: one form, one request, one playback.
//!
//! ```text
//! convert_and_play(text, voice) → guard (single flight)
//!     → provider.synthesize() → drain_stream() → AudioRegistry::create()
//!     → halt previous playback, revoke previous handle
//!     → output.start() → finished subscription
//! ```
//!
//! State is published through a [`watch`] channel so the presentation layer
//! can render it or wait on it. The playing flag is cleared by a finished
//! subscription that is aborted whenever its playback is replaced or stopped,
//! and that also checks the playback id before touching state, so a late
//! notification from an old playback cannot clear the flag of a new one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use parla_core::types::{SessionConfig, SessionState, Voice};

use crate::drain::drain_stream;
use crate::error::{SessionError, SynthesisError};
use crate::handle::{AudioHandle, AudioRegistry};
use crate::playback::{AudioOutput, PlaybackId};
use crate::provider::{SpeechProvider, SynthesisRequest};

/// Cloneable handle to one speech session.
#[derive(Clone)]
pub struct SpeechSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    provider: Arc<dyn SpeechProvider>,
    output: Arc<dyn AudioOutput>,
    registry: AudioRegistry,
    status_tx: watch::Sender<SessionState>,
    in_flight: AtomicBool,
    active: Mutex<ActiveAudio>,
    next_playback: AtomicU64,
    rng: Mutex<StdRng>,
}

/// The one audio buffer and the one playback a session may hold.
#[derive(Default)]
struct ActiveAudio {
    handle: Option<AudioHandle>,
    playback: Option<ActivePlayback>,
    /// Playback handed to the output but not yet audible. Cleared by a stop.
    starting: Option<PlaybackId>,
}

struct ActivePlayback {
    id: PlaybackId,
    _finished: FinishedSubscription,
}

/// Finished-notification listener. Dropping it unregisters the listener.
struct FinishedSubscription(AbortHandle);

impl Drop for FinishedSubscription {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Holds the single-flight slot for the duration of one conversion.
struct InFlight<'a> {
    inner: &'a Inner,
}

impl<'a> InFlight<'a> {
    fn acquire(inner: &'a Inner) -> Result<Self, SessionError> {
        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::Busy);
        }
        inner.update(|s| s.is_request_in_flight = true);
        Ok(Self { inner })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.update(|s| s.is_request_in_flight = false);
        self.inner.in_flight.store(false, Ordering::SeqCst);
    }
}

// ─── Construction & queries ────────────────────────────────────────────────

impl SpeechSession {
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn SpeechProvider>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        Self::with_rng(config, provider, output, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new) with a deterministic random source.
    pub fn with_seed(
        config: SessionConfig,
        provider: Arc<dyn SpeechProvider>,
        output: Arc<dyn AudioOutput>,
        seed: u64,
    ) -> Self {
        Self::with_rng(config, provider, output, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        config: SessionConfig,
        provider: Arc<dyn SpeechProvider>,
        output: Arc<dyn AudioOutput>,
        rng: StdRng,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionState::new(&config));
        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                output,
                registry: AudioRegistry::new(),
                status_tx,
                in_flight: AtomicBool::new(false),
                active: Mutex::new(ActiveAudio::default()),
                next_playback: AtomicU64::new(0),
                rng: Mutex::new(rng),
            }),
        }
    }

    /// Current state snapshot.
    pub fn status(&self) -> SessionState {
        self.inner.status_tx.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.status_tx.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn voices(&self) -> &[Voice] {
        &self.inner.config.voices
    }

    pub fn example_phrases(&self) -> &[String] {
        &self.inner.config.example_phrases
    }

    /// Registry holding the session's live audio buffer.
    pub fn registry(&self) -> &AudioRegistry {
        &self.inner.registry
    }

    /// The current audio buffer and its MIME type, if any.
    pub fn current_audio(&self) -> Option<(Bytes, &'static str)> {
        self.inner
            .active()
            .handle
            .as_ref()
            .map(|h| (h.audio().clone(), h.mime()))
    }
}

// ─── Form state ────────────────────────────────────────────────────────────

impl SpeechSession {
    pub fn set_text(&self, text: &str) {
        self.inner.update(|s| s.current_text = text.to_string());
    }

    pub fn clear_text(&self) {
        self.inner.update(|s| s.current_text.clear());
    }

    pub fn select_voice(&self, voice_id: &str) -> Result<(), SessionError> {
        if self.inner.config.voice(voice_id).is_none() {
            return Err(SessionError::UnknownVoice(voice_id.to_string()));
        }
        self.inner
            .update(|s| s.selected_voice_id = voice_id.to_string());
        Ok(())
    }

    /// Select a uniformly random voice from the catalogue.
    pub fn pick_random_voice(&self) -> Option<Voice> {
        let voice = self
            .inner
            .config
            .voices
            .choose(&mut *self.inner.rng())
            .cloned()?;
        self.inner.update(|s| s.selected_voice_id = voice.id.clone());
        Some(voice)
    }

    /// Replace the text with a uniformly random example phrase.
    pub fn pick_random_phrase(&self) -> Option<String> {
        let phrase = self
            .inner
            .config
            .example_phrases
            .choose(&mut *self.inner.rng())
            .cloned()?;
        self.inner.update(|s| s.current_text = phrase.clone());
        Some(phrase)
    }

    /// Copy recent phrase `index` into the text field.
    pub fn select_recent(&self, index: usize) -> Option<String> {
        let phrase = self
            .inner
            .status_tx
            .borrow()
            .recent_phrases
            .get(index)
            .map(String::from)?;
        self.inner.update(|s| s.current_text = phrase.clone());
        Some(phrase)
    }

    pub fn dismiss_error(&self) {
        self.inner.update(|s| s.last_error = None);
    }
}

// ─── Synthesis & playback ──────────────────────────────────────────────────

impl SpeechSession {
    /// Synthesize `text` with `voice_id`, replace the current audio and play it.
    pub async fn convert_and_play(&self, text: &str, voice_id: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyText);
        }
        self.speak(text, voice_id, true).await
    }

    /// Convert whatever the form currently holds.
    pub async fn convert_current(&self) -> Result<(), SessionError> {
        let (text, voice_id) = {
            let state = self.inner.status_tx.borrow();
            (state.current_text.clone(), state.selected_voice_id.clone())
        };
        self.convert_and_play(&text, &voice_id).await
    }

    /// Play the preview sentence with `voice_id`. Not added to recent phrases.
    pub async fn preview_voice(&self, voice_id: &str) -> Result<(), SessionError> {
        let text = self.inner.config.preview_text.clone();
        self.speak(&text, voice_id, false).await
    }

    /// Halt playback. Returns `false` when nothing was playing.
    pub fn stop(&self) -> bool {
        let stopped = self.inner.halt_playback();
        if stopped {
            info!("session: playback stopped");
        }
        stopped
    }

    /// Write the current audio to `path`, or `speech.<ext>` when `None`.
    pub async fn download(&self, path: Option<&Path>) -> Result<PathBuf, SessionError> {
        let (audio, _) = self.current_audio().ok_or(SessionError::NoAudio)?;
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(self.inner.config.output_format.download_name()));
        tokio::fs::write(&path, &audio).await?;
        info!("session: saved {} bytes to {}", audio.len(), path.display());
        Ok(path)
    }

    async fn speak(&self, text: &str, voice_id: &str, remember: bool) -> Result<(), SessionError> {
        let inner = &*self.inner;
        let config = &inner.config;

        if config.voice(voice_id).is_none() {
            return Err(SessionError::UnknownVoice(voice_id.to_string()));
        }

        let Some(api_key) = config.credential().map(String::from) else {
            warn!("session: no API key configured");
            let err = SessionError::MissingCredential;
            inner.update(|s| s.last_error = Some(err.to_string()));
            return Err(err);
        };

        let _guard = InFlight::acquire(inner)?;
        inner.update(|s| s.last_error = None);

        let request = SynthesisRequest {
            api_key,
            voice_id: voice_id.to_string(),
            text: text.to_string(),
            model_id: config.model_id.clone(),
            output_format: config.output_format,
        };
        info!("session: synthesizing {} chars with voice {voice_id}", text.len());

        let audio = match self.synthesize(request).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("session: synthesis failed: {e}");
                inner.halt_playback();
                let err = SessionError::from(e);
                inner.update(|s| s.last_error = Some(err.to_string()));
                return Err(err);
            }
        };

        let id = inner.next_playback.fetch_add(1, Ordering::SeqCst) + 1;
        let url = inner.replace_audio(id, audio.clone());
        debug!("session: playback #{id} for {url} ({} bytes)", audio.len());

        let finished = match inner.output.start(id, audio).await {
            Ok(finished) => finished,
            Err(e) => {
                warn!("session: playback #{id} failed: {e}");
                inner.active().starting.take_if(|s| *s == id);
                let err = SessionError::from(e);
                inner.update(|s| {
                    s.is_playing = false;
                    s.last_error = Some(err.to_string());
                });
                return Err(err);
            }
        };

        let playing = {
            let mut active = inner.active();
            let playing = active.starting.take_if(|s| *s == id).is_some();
            if playing {
                let subscription = subscribe_finished(Arc::downgrade(&self.inner), id, finished);
                active.playback = Some(ActivePlayback {
                    id,
                    _finished: subscription,
                });
            } else {
                inner.output.halt(id);
            }
            inner.update(|s| {
                s.is_playing = playing;
                s.last_error = None;
                if remember {
                    s.recent_phrases.push(text);
                }
            });
            playing
        };

        if playing {
            info!("session: playback #{id} started");
        } else {
            info!("session: playback #{id} stopped before it started");
        }
        Ok(())
    }

    async fn synthesize(&self, request: SynthesisRequest) -> Result<Bytes, SynthesisError> {
        let stream = self.inner.provider.synthesize(request).await?;
        drain_stream(stream).await
    }
}

/// Clear the playing flag when playback `id` ends on its own.
fn subscribe_finished(
    inner: Weak<Inner>,
    id: PlaybackId,
    finished: oneshot::Receiver<()>,
) -> FinishedSubscription {
    let task = tokio::spawn(async move {
        if finished.await.is_err() {
            return;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut active = inner.active();
        if active.playback.as_ref().is_some_and(|p| p.id == id) {
            // Dropping our own subscription here only aborts at the next
            // await point, and there is none left.
            active.playback = None;
            inner.update(|s| s.is_playing = false);
            debug!("session: playback #{id} finished");
        } else {
            debug!("session: ignoring finish of replaced playback #{id}");
        }
    });
    FinishedSubscription(task.abort_handle())
}

// ─── Internals ─────────────────────────────────────────────────────────────

impl Inner {
    fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.status_tx.send_modify(f);
    }

    fn active(&self) -> MutexGuard<'_, ActiveAudio> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Halt the active or starting playback, if any, and clear the playing
    /// flag. A cancelled start is halted again once the output reports it.
    fn halt_playback(&self) -> bool {
        let (previous, starting) = {
            let mut active = self.active();
            (active.playback.take(), active.starting.take())
        };
        if let Some(id) = starting {
            self.output.halt(id);
        }
        match previous {
            Some(playback) => {
                self.output.halt(playback.id);
                drop(playback);
                self.update(|s| s.is_playing = false);
                true
            }
            None => starting.is_some(),
        }
    }

    /// Stop the previous playback, revoke the previous handle and register
    /// `audio` as the current buffer, marking playback `id` as starting.
    /// Returns the new URL.
    fn replace_audio(&self, id: PlaybackId, audio: Bytes) -> String {
        let url = {
            let mut active = self.active();
            if let Some(previous) = active.playback.take() {
                self.output.halt(previous.id);
            }
            active.starting = Some(id);
            drop(active.handle.take());
            let handle = self
                .registry
                .create(audio, self.config.output_format.mime_type());
            let url = handle.url();
            active.handle = Some(handle);
            url
        };
        self.update(|s| {
            s.is_playing = false;
            s.current_audio_url = Some(url.clone());
        });
        url
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let active = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(playback) = active.playback.take() {
            self.output.halt(playback.id);
        }
        if let Some(id) = active.starting.take() {
            self.output.halt(id);
        }
        active.handle = None;
    }
}
