//! Gateway trait

use async_trait::async_trait;
use camguard_api::{ActionFailure, ActionOutcome, GatewayAction};
use camguard_util::{ChannelId, UserId};
use std::time::Duration;
use thiserror::Error;

/// Errors from gateway operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The platform refused the action (role hierarchy, missing permission)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Direct messages disabled for user")]
    DirectMessagesDisabled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gateway not connected")]
    Disconnected,

    #[error("Gateway did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Gateway error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Rebuild an error from the bridge's reported outcome
    pub fn from_outcome(outcome: ActionOutcome) -> GatewayResult<()> {
        match outcome {
            ActionOutcome::Done => Ok(()),
            ActionOutcome::Failed { failure, message } => Err(match failure {
                ActionFailure::PermissionDenied => GatewayError::PermissionDenied(message),
                ActionFailure::DirectMessagesDisabled => GatewayError::DirectMessagesDisabled,
                ActionFailure::NotFound => GatewayError::NotFound(message),
                ActionFailure::Other => GatewayError::Other(message),
            }),
        }
    }

    /// Whether repeating the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Disconnected | GatewayError::Timeout(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Moderation and messaging calls into the chat platform
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Server-mute or unmute a member in voice
    async fn mute(&self, user_id: UserId, muted: bool) -> GatewayResult<()>;

    /// Server-deafen or undeafen a member in voice
    async fn deafen(&self, user_id: UserId, deafened: bool) -> GatewayResult<()>;

    async fn move_member(&self, user_id: UserId, channel_id: ChannelId) -> GatewayResult<()>;

    async fn apply_timeout(
        &self,
        user_id: UserId,
        duration: Duration,
        reason: &str,
    ) -> GatewayResult<()>;

    async fn remove_timeout(&self, user_id: UserId, reason: &str) -> GatewayResult<()>;

    async fn send_channel_message(&self, channel_id: ChannelId, content: &str)
        -> GatewayResult<()>;

    async fn send_direct_message(&self, user_id: UserId, content: &str) -> GatewayResult<()>;

    /// Dispatch a queued action to the matching call
    async fn perform(&self, action: &GatewayAction) -> GatewayResult<()> {
        match action {
            GatewayAction::Mute { user_id, muted } => self.mute(*user_id, *muted).await,
            GatewayAction::Deafen { user_id, deafened } => {
                self.deafen(*user_id, *deafened).await
            }
            GatewayAction::MoveMember {
                user_id,
                channel_id,
            } => self.move_member(*user_id, *channel_id).await,
            GatewayAction::ApplyTimeout {
                user_id,
                duration_secs,
                reason,
            } => {
                self.apply_timeout(*user_id, Duration::from_secs(*duration_secs), reason)
                    .await
            }
            GatewayAction::RemoveTimeout { user_id, reason } => {
                self.remove_timeout(*user_id, reason).await
            }
            GatewayAction::SendChannelMessage {
                channel_id,
                content,
            } => self.send_channel_message(*channel_id, content).await,
            GatewayAction::SendDirectMessage { user_id, content } => {
                self.send_direct_message(*user_id, content).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_error() {
        assert_eq!(GatewayError::from_outcome(ActionOutcome::Done), Ok(()));
        assert_eq!(
            GatewayError::from_outcome(ActionOutcome::Failed {
                failure: ActionFailure::PermissionDenied,
                message: "role hierarchy".into(),
            }),
            Err(GatewayError::PermissionDenied("role hierarchy".into()))
        );
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(GatewayError::Disconnected.is_retryable());
        assert!(GatewayError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!GatewayError::PermissionDenied("x".into()).is_retryable());
        assert!(!GatewayError::DirectMessagesDisabled.is_retryable());
    }
}
