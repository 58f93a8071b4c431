//! Mock gateway for testing

use async_trait::async_trait;
use camguard_api::GatewayAction;
use camguard_util::{ChannelId, UserId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{Gateway, GatewayError, GatewayResult};

/// Records every call and fails on demand
#[derive(Clone, Default)]
pub struct MockGateway {
    calls: Arc<Mutex<Vec<GatewayAction>>>,

    /// Action names (see `GatewayAction::name`) refused with PermissionDenied
    pub deny: Arc<Mutex<HashSet<&'static str>>>,

    /// Users whose direct messages are refused
    pub dms_closed: Arc<Mutex<HashSet<UserId>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every future call of the named action
    pub fn deny_action(&self, name: &'static str) {
        self.deny.lock().unwrap().insert(name);
    }

    pub fn close_dms(&self, user_id: UserId) {
        self.dms_closed.lock().unwrap().insert(user_id);
    }

    /// Every call so far, in order, including refused ones
    pub fn calls(&self) -> Vec<GatewayAction> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, user_id: UserId) -> Vec<GatewayAction> {
        self.calls()
            .into_iter()
            .filter(|a| a.target() == Some(user_id))
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, action: GatewayAction) -> GatewayResult<()> {
        let name = action.name();
        let dm_target = match &action {
            GatewayAction::SendDirectMessage { user_id, .. } => Some(*user_id),
            _ => None,
        };
        self.calls.lock().unwrap().push(action);

        if self.deny.lock().unwrap().contains(name) {
            return Err(GatewayError::PermissionDenied(format!("mock denied {}", name)));
        }
        if let Some(user_id) = dm_target
            && self.dms_closed.lock().unwrap().contains(&user_id)
        {
            return Err(GatewayError::DirectMessagesDisabled);
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn mute(&self, user_id: UserId, muted: bool) -> GatewayResult<()> {
        self.record(GatewayAction::Mute { user_id, muted })
    }

    async fn deafen(&self, user_id: UserId, deafened: bool) -> GatewayResult<()> {
        self.record(GatewayAction::Deafen { user_id, deafened })
    }

    async fn move_member(&self, user_id: UserId, channel_id: ChannelId) -> GatewayResult<()> {
        self.record(GatewayAction::MoveMember {
            user_id,
            channel_id,
        })
    }

    async fn apply_timeout(
        &self,
        user_id: UserId,
        duration: Duration,
        reason: &str,
    ) -> GatewayResult<()> {
        self.record(GatewayAction::ApplyTimeout {
            user_id,
            duration_secs: duration.as_secs(),
            reason: reason.to_string(),
        })
    }

    async fn remove_timeout(&self, user_id: UserId, reason: &str) -> GatewayResult<()> {
        self.record(GatewayAction::RemoveTimeout {
            user_id,
            reason: reason.to_string(),
        })
    }

    async fn send_channel_message(
        &self,
        channel_id: ChannelId,
        content: &str,
    ) -> GatewayResult<()> {
        self.record(GatewayAction::SendChannelMessage {
            channel_id,
            content: content.to_string(),
        })
    }

    async fn send_direct_message(&self, user_id: UserId, content: &str) -> GatewayResult<()> {
        self.record(GatewayAction::SendDirectMessage {
            user_id,
            content: content.to_string(),
        })
    }
}
