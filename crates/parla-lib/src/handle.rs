//! Revocable handles for in-memory audio buffers.
//!
//! Each synthesized buffer is registered under a `blob:parla/<id>` URL and
//! stays resolvable for as long as its [`AudioHandle`] lives. Dropping the
//! handle revokes the URL, so a session that only ever keeps its latest
//! handle has at most one outstanding buffer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::debug;

const URL_PREFIX: &str = "blob:parla/";

#[derive(Clone)]
struct Entry {
    audio: Bytes,
    mime: &'static str,
}

#[derive(Default)]
struct Shared {
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl Shared {
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Store of live audio buffers. Cheap to clone.
#[derive(Clone, Default)]
pub struct AudioRegistry {
    shared: Arc<Shared>,
}

impl AudioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `audio` and return the handle that owns it.
    pub fn create(&self, audio: Bytes, mime: &'static str) -> AudioHandle {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.entries().insert(
            id,
            Entry {
                audio: audio.clone(),
                mime,
            },
        );
        debug!("registry: created {URL_PREFIX}{id} ({} bytes)", audio.len());
        AudioHandle {
            id,
            audio,
            mime,
            registry: self.clone(),
        }
    }

    /// Look up a live buffer and its MIME type.
    pub fn resolve(&self, id: u64) -> Option<(Bytes, &'static str)> {
        self.shared
            .entries()
            .get(&id)
            .map(|e| (e.audio.clone(), e.mime))
    }

    /// Resolve by URL.
    pub fn resolve_url(&self, url: &str) -> Option<(Bytes, &'static str)> {
        parse_url(url).and_then(|id| self.resolve(id))
    }

    /// Number of unrevoked handles.
    pub fn outstanding(&self) -> usize {
        self.shared.entries().len()
    }

    fn revoke(&self, id: u64) {
        if self.shared.entries().remove(&id).is_some() {
            debug!("registry: revoked {URL_PREFIX}{id}");
        }
    }
}

/// Parse the id out of a `blob:parla/<id>` URL.
pub fn parse_url(url: &str) -> Option<u64> {
    url.strip_prefix(URL_PREFIX)?.parse().ok()
}

/// Owner of one registered buffer. Revokes its URL on drop.
pub struct AudioHandle {
    id: u64,
    audio: Bytes,
    mime: &'static str,
    registry: AudioRegistry,
}

impl AudioHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> String {
        format!("{URL_PREFIX}{}", self.id)
    }

    pub fn audio(&self) -> &Bytes {
        &self.audio
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }
}

impl Drop for AudioHandle {
    fn drop(&mut self) {
        self.registry.revoke(self.id);
    }
}
