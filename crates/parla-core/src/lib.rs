//! parla-core: Pure types for the speech session.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod audio;
pub mod recent;
pub mod types;
