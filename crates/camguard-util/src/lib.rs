//! Shared utilities for camguardd
//!
//! This crate provides:
//! - ID types (UserId, ChannelId, ClientId, ActionId)
//! - Time utilities (mock-able wall clock, daily wall-clock boundaries)
//! - Error types
//! - Per-(actor, action) command cooldowns
//! - Default paths for socket, data, and config files

mod cooldown;
mod error;
mod ids;
mod paths;
mod time;

pub use cooldown::*;
pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
