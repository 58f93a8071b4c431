//! Core moderation engine for camguardd
//!
//! This crate is the heart of camguardd, containing:
//! - Presence state machine (NotPresent -> Compliant <-> NonCompliant -> Punished)
//! - Violation escalation (move, short timeout, long timeout)
//! - Auto-pause when the camera-on audience empties
//! - VC time and command usage stats with daily rotation
//! - The `CoreEngine` context tying them to the persisted state
//!
//! Everything here is synchronous and driven by explicit timestamps; the
//! daemon owns timers, IO and the gateway.

mod autopause;
mod engine;
mod escalation;
mod events;
mod presence;
mod stats;

pub use autopause::*;
pub use engine::*;
pub use escalation::*;
pub use events::*;
pub use presence::*;
pub use stats::*;
