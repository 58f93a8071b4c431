//! Gateway implementation backed by the IPC bridge
//!
//! The daemon has no connection to the chat platform of its own. Each action
//! is published as an `action_requested` event; the bridge performs it and
//! answers with an `action_result` command carrying the same action id.

use async_trait::async_trait;
use camguard_api::{ActionOutcome, Event, EventPayload, GatewayAction};
use camguard_gateway::{Gateway, GatewayError, GatewayResult};
use camguard_ipc::IpcServer;
use camguard_util::{ActionId, ChannelId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

/// How long the bridge has to answer an action request
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Actions published to the bridge and not answered yet. Cheap to clone.
#[derive(Clone, Default)]
pub struct PendingActions {
    waiting: Arc<Mutex<HashMap<ActionId, oneshot::Sender<ActionOutcome>>>>,
}

impl PendingActions {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self) -> (ActionId, oneshot::Receiver<ActionOutcome>) {
        let action_id = ActionId::new();
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().await.insert(action_id, tx);
        (action_id, rx)
    }

    async fn forget(&self, action_id: ActionId) {
        self.waiting.lock().await.remove(&action_id);
    }

    /// Deliver the bridge's answer. Returns false for unknown (or expired)
    /// action ids.
    pub async fn resolve(&self, action_id: ActionId, outcome: ActionOutcome) -> bool {
        match self.waiting.lock().await.remove(&action_id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub async fn outstanding(&self) -> usize {
        self.waiting.lock().await.len()
    }
}

/// Performs gateway actions through the connected bridge
pub struct IpcGateway {
    ipc: Arc<IpcServer>,
    pending: PendingActions,
    timeout: Duration,
}

impl IpcGateway {
    pub fn new(ipc: Arc<IpcServer>, pending: PendingActions) -> Self {
        Self {
            ipc,
            pending,
            timeout: ACTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request(&self, action: GatewayAction) -> GatewayResult<()> {
        if self.ipc.bridge_count().await == 0 {
            return Err(GatewayError::Disconnected);
        }

        let (action_id, rx) = self.pending.register().await;
        debug!(action_id = %action_id, action = action.name(), target_user = ?action.target(), "Requesting gateway action");

        self.ipc
            .broadcast_event(Event::new(EventPayload::ActionRequested { action_id, action }));

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => GatewayError::from_outcome(outcome),
            Ok(Err(_)) => Err(GatewayError::Disconnected),
            Err(_) => {
                self.pending.forget(action_id).await;
                warn!(action_id = %action_id, "Bridge did not answer action request");
                Err(GatewayError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl Gateway for IpcGateway {
    async fn mute(&self, user_id: UserId, muted: bool) -> GatewayResult<()> {
        self.request(GatewayAction::Mute { user_id, muted }).await
    }

    async fn deafen(&self, user_id: UserId, deafened: bool) -> GatewayResult<()> {
        self.request(GatewayAction::Deafen { user_id, deafened })
            .await
    }

    async fn move_member(&self, user_id: UserId, channel_id: ChannelId) -> GatewayResult<()> {
        self.request(GatewayAction::MoveMember {
            user_id,
            channel_id,
        })
        .await
    }

    async fn apply_timeout(
        &self,
        user_id: UserId,
        duration: Duration,
        reason: &str,
    ) -> GatewayResult<()> {
        self.request(GatewayAction::ApplyTimeout {
            user_id,
            duration_secs: duration.as_secs(),
            reason: reason.to_string(),
        })
        .await
    }

    async fn remove_timeout(&self, user_id: UserId, reason: &str) -> GatewayResult<()> {
        self.request(GatewayAction::RemoveTimeout {
            user_id,
            reason: reason.to_string(),
        })
        .await
    }

    async fn send_channel_message(
        &self,
        channel_id: ChannelId,
        content: &str,
    ) -> GatewayResult<()> {
        self.request(GatewayAction::SendChannelMessage {
            channel_id,
            content: content.to_string(),
        })
        .await
    }

    async fn send_direct_message(&self, user_id: UserId, content: &str) -> GatewayResult<()> {
        self.request(GatewayAction::SendDirectMessage {
            user_id,
            content: content.to_string(),
        })
        .await
    }

    async fn perform(&self, action: &GatewayAction) -> GatewayResult<()> {
        self.request(action.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camguard_api::{ActionFailure, Command, ResponsePayload, Response};
    use camguard_ipc::{IpcClient, ServerMessage};
    use tempfile::tempdir;

    async fn server(dir: &tempfile::TempDir) -> Arc<IpcServer> {
        let mut server = IpcServer::new(dir.path().join("camguard.sock"));
        server.start().await.unwrap();
        let server = Arc::new(server);
        let runner = server.clone();
        tokio::spawn(async move { runner.run().await });
        server
    }

    #[tokio::test]
    async fn test_no_bridge_is_disconnected() {
        let dir = tempdir().unwrap();
        let ipc = server(&dir).await;
        let gateway = IpcGateway::new(ipc, PendingActions::new());

        let result = gateway.mute(UserId::new(1), true).await;
        assert_eq!(result, Err(GatewayError::Disconnected));
    }

    #[tokio::test]
    async fn test_bridge_answers_action() {
        let dir = tempdir().unwrap();
        let ipc = server(&dir).await;
        let pending = PendingActions::new();
        let mut messages = ipc.take_message_receiver().await.unwrap();

        // Route requests the way the service does
        let router_ipc = ipc.clone();
        let router_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                let ServerMessage::Request { client_id, request } = msg else {
                    continue;
                };
                let payload = match request.command {
                    Command::SubscribeEvents => ResponsePayload::Subscribed {
                        client_id: client_id.clone(),
                    },
                    Command::ActionResult { action_id, outcome } => {
                        router_pending.resolve(action_id, outcome).await;
                        ResponsePayload::Accepted
                    }
                    _ => ResponsePayload::Pong,
                };
                let _ = router_ipc
                    .send_response(&client_id, Response::success(request.request_id, payload))
                    .await;
            }
        });

        let mut bridge = IpcClient::connect(ipc.socket_path()).await.unwrap();
        bridge.subscribe().await.unwrap();

        // The bridge refuses the first action and performs the second
        tokio::spawn(async move {
            let mut answered = 0;
            while answered < 2 {
                let event = bridge.next_event().await.unwrap();
                if let EventPayload::ActionRequested { action_id, .. } = event.payload {
                    let outcome = if answered == 0 {
                        ActionOutcome::Failed {
                            failure: ActionFailure::PermissionDenied,
                            message: "missing Move Members".into(),
                        }
                    } else {
                        ActionOutcome::Done
                    };
                    bridge
                        .send(Command::ActionResult { action_id, outcome })
                        .await
                        .unwrap();
                    answered += 1;
                }
            }
        });

        let gateway = IpcGateway::new(ipc, pending.clone());
        let denied = gateway
            .move_member(UserId::new(5), ChannelId::new(2000))
            .await;
        assert!(matches!(denied, Err(GatewayError::PermissionDenied(_))));

        let done = gateway.send_direct_message(UserId::new(5), "hello").await;
        assert_eq!(done, Ok(()));
        assert_eq!(pending.outstanding().await, 0);
    }

    #[tokio::test]
    async fn test_unanswered_action_times_out() {
        let dir = tempdir().unwrap();
        let ipc = server(&dir).await;
        let pending = PendingActions::new();
        let mut messages = ipc.take_message_receiver().await.unwrap();

        let router_ipc = ipc.clone();
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                if let ServerMessage::Request { client_id, request } = msg {
                    let _ = router_ipc
                        .send_response(
                            &client_id,
                            Response::success(
                                request.request_id,
                                ResponsePayload::Subscribed {
                                    client_id: client_id.clone(),
                                },
                            ),
                        )
                        .await;
                }
            }
        });

        // Subscribed but never answers
        let mut bridge = IpcClient::connect(ipc.socket_path()).await.unwrap();
        bridge.subscribe().await.unwrap();

        let gateway =
            IpcGateway::new(ipc, pending.clone()).with_timeout(Duration::from_millis(100));
        let result = gateway.mute(UserId::new(1), true).await;
        assert_eq!(result, Err(GatewayError::Timeout(Duration::from_millis(100))));
        assert_eq!(pending.outstanding().await, 0);

        drop(bridge);
    }
}
