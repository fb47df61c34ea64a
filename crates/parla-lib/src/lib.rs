//! parla-lib: Speech session engine.
//!
//! Provider client, stream drain, revocable audio handles, audio output,
//! the session controller, and the HTTP API that drives it.
//! Depends on parla-core for pure types.

pub mod drain;
pub mod error;
pub mod handle;
pub mod playback;
pub mod provider;
pub mod server;
pub mod session;

// Re-export parla-core for convenience
pub use parla_core;
