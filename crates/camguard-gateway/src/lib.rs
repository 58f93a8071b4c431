//! Chat platform gateway interface for camguardd
//!
//! The daemon never talks to the chat platform directly. Every moderation
//! or messaging call goes through the `Gateway` trait, implemented over IPC
//! by the daemon and by `MockGateway` in tests.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
