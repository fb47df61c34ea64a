//! Audio output: plays one in-memory buffer at a time.
//!
//! [`RodioOutput`] owns a dedicated OS thread because rodio's `OutputStream`
//! is `!Send`. Commands arrive over a std channel; the thread polls the sink
//! between commands and fires the playback's `finished` sender when the sink
//! drains on its own. Halting drops that sender instead, so a halted
//! playback never reports completion.
//!
//! ```text
//! start(id, mp3) → [cmd_tx] → playback thread: stop previous sink, decode, append
//!                                ↳ ready ack (decode result)
//!                                ↳ finished (sink empty)
//! ```

use std::io::Cursor;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::PlaybackError;

/// Identifies one playback started through an [`AudioOutput`].
pub type PlaybackId = u64;

/// How often the playback thread checks for natural completion.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Something that can play an encoded audio buffer.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Stop whatever is playing and start `audio`. Resolves once the buffer
    /// is decoded and audible; the returned receiver fires when playback
    /// ends naturally and is dropped unsent when it is halted.
    async fn start(
        &self,
        id: PlaybackId,
        audio: Bytes,
    ) -> Result<oneshot::Receiver<()>, PlaybackError>;

    /// Halt playback `id` and reset its position. Unknown ids are ignored.
    fn halt(&self, id: PlaybackId);
}

// ─── Rodio output ──────────────────────────────────────────────────────────

enum OutputCmd {
    Play {
        id: PlaybackId,
        audio: Bytes,
        ready: oneshot::Sender<Result<(), PlaybackError>>,
        finished: oneshot::Sender<()>,
    },
    Halt(PlaybackId),
}

/// System audio device via rodio.
pub struct RodioOutput {
    cmd_tx: mpsc::Sender<OutputCmd>,
}

impl RodioOutput {
    /// Open the default output device on a new playback thread.
    pub fn new() -> Result<Self, PlaybackError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<OutputCmd>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), PlaybackError>>();

        std::thread::Builder::new()
            .name("parla-playback".into())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("playback: failed to open audio output: {e}");
                        let _ = init_tx.send(Err(PlaybackError::Device(e.to_string())));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));
                playback_thread(cmd_rx, handle);
            })
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        init_rx.recv().map_err(|_| PlaybackError::Unavailable)??;
        info!("playback: audio output ready");
        Ok(Self { cmd_tx })
    }
}

#[async_trait]
impl AudioOutput for RodioOutput {
    async fn start(
        &self,
        id: PlaybackId,
        audio: Bytes,
    ) -> Result<oneshot::Receiver<()>, PlaybackError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        self.cmd_tx
            .send(OutputCmd::Play {
                id,
                audio,
                ready: ready_tx,
                finished: finished_tx,
            })
            .map_err(|_| PlaybackError::Unavailable)?;

        ready_rx.await.map_err(|_| PlaybackError::Unavailable)??;
        Ok(finished_rx)
    }

    fn halt(&self, id: PlaybackId) {
        let _ = self.cmd_tx.send(OutputCmd::Halt(id));
    }
}

struct Active {
    id: PlaybackId,
    sink: Sink,
    finished: oneshot::Sender<()>,
}

fn playback_thread(cmd_rx: mpsc::Receiver<OutputCmd>, handle: OutputStreamHandle) {
    let mut active: Option<Active> = None;

    loop {
        match cmd_rx.recv_timeout(POLL_INTERVAL) {
            Ok(OutputCmd::Play {
                id,
                audio,
                ready,
                finished,
            }) => {
                if let Some(prev) = active.take() {
                    debug!("playback: replacing #{} with #{id}", prev.id);
                    prev.sink.stop();
                }

                let source = match Decoder::new(Cursor::new(audio)) {
                    Ok(source) => source,
                    Err(e) => {
                        error!("playback: decode failed for #{id}: {e}");
                        let _ = ready.send(Err(PlaybackError::Decode(e.to_string())));
                        continue;
                    }
                };
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!("playback: failed to create sink: {e}");
                        let _ = ready.send(Err(PlaybackError::Device(e.to_string())));
                        continue;
                    }
                };

                sink.append(source);
                debug!("playback: #{id} started");
                let _ = ready.send(Ok(()));
                active = Some(Active { id, sink, finished });
            }
            Ok(OutputCmd::Halt(id)) => {
                if let Some(halted) = active.take_if(|a| a.id == id) {
                    halted.sink.stop();
                    debug!("playback: #{id} halted");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(a) = active.take() {
                    a.sink.stop();
                }
                break;
            }
        }

        if let Some(done) = active.take_if(|a| a.sink.empty()) {
            debug!("playback: #{} finished", done.id);
            let _ = done.finished.send(());
        }
    }
}

// ─── Silent output ─────────────────────────────────────────────────────────

/// Output for hosts without an audio device: every playback finishes as
/// soon as it starts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

#[async_trait]
impl AudioOutput for SilentOutput {
    async fn start(
        &self,
        id: PlaybackId,
        audio: Bytes,
    ) -> Result<oneshot::Receiver<()>, PlaybackError> {
        debug!("playback: #{id} silent ({} bytes)", audio.len());
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Ok(rx)
    }

    fn halt(&self, _id: PlaybackId) {}
}
