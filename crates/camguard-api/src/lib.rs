//! Protocol types for camguardd IPC
//!
//! This crate defines the stable API between camguardd and the gateway
//! bridge (or any observer client):
//! - Commands (gateway events, control and admin requests)
//! - Responses
//! - Events (service -> clients), including gateway action requests
//! - Shared moderation types (capabilities, violations, timeouts)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
