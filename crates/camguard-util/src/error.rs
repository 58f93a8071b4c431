//! Error types for camguardd

use thiserror::Error;

use crate::UserId;

/// Core error type for camguardd operations
#[derive(Debug, Error)]
pub enum CamguardError {
    #[error("User not present in a monitored channel: {0}")]
    UserNotPresent(UserId),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Gateway error: {0}")]
    GatewayError(String),

    #[error("Automation error: {0}")]
    AutomationError(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("User is disabled from running commands: {0}")]
    CommandsDisabled(UserId),

    #[error("Command on cooldown, retry in {retry_after_secs}s")]
    CooldownActive { retry_after_secs: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CamguardError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::GatewayError(msg.into())
    }

    pub fn automation(msg: impl Into<String>) -> Self {
        Self::AutomationError(msg.into())
    }

    pub fn ipc(msg: impl Into<String>) -> Self {
        Self::IpcError(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CamguardError>;
