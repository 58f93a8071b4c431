//! Browser driver trait

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from driver calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("Driver call timed out after {0:?}")]
    Timeout(Duration),

    /// The session may recover after a relaunch
    #[error("Driver error: {0}")]
    Transient(String),

    /// Relaunching will not help (driver/browser mismatch, bad capabilities)
    #[error("Fatal driver error: {0}")]
    Fatal(String),
}

impl DriverError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Fatal(_))
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// One browser session.
///
/// Calls are made by a single owner and never overlap. Implementations may
/// block for a long time; the caller bounds every call with a timeout.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Start a browser session, replacing any previous one
    async fn launch(&mut self) -> DriverResult<()>;

    async fn navigate(&mut self, url: &str) -> DriverResult<()>;

    /// Dispatch a keydown for each key, in order
    async fn send_key_sequence(&mut self, keys: &[String]) -> DriverResult<()>;

    async fn reload(&mut self) -> DriverResult<()>;

    /// URL of the current page; used as the liveness probe
    async fn current_location(&mut self) -> DriverResult<String>;

    /// End the session. Safe to call without a session.
    async fn quit(&mut self) -> DriverResult<()>;
}
