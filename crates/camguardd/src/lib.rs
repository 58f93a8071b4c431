//! camguardd service internals
//!
//! Wires the core engine to its collaborators:
//! - IPC server (gateway bridge and observers)
//! - Gateway actions performed by the bridge over IPC
//! - Per-user grace timers
//! - The browser automation worker

mod bridge;
mod dispatch;
mod service;
mod timers;

pub use bridge::*;
pub use dispatch::*;
pub use service::*;
pub use timers::*;
